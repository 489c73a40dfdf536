//! CSV sink for enriched datasets.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use tracing::info;

use geozip_shared::{Dataset, GeozipError, OutputConfig, Result, ZIP_CODE_COLUMN, delimiter_byte};

/// How to write the enriched file.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormat {
    /// Field separator.
    pub delimiter: u8,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl OutputFormat {
    /// Resolve the `[output]` config section.
    pub fn from_config(config: &OutputConfig) -> Result<Self> {
        Ok(Self {
            delimiter: delimiter_byte(&config.delimiter)?,
        })
    }
}

/// Write `dataset` as UTF-8 CSV to `path`, adding the `zip_code` column.
///
/// The file is written next to its destination and renamed into place, so a
/// failed write never leaves a truncated output behind. The dataset is only
/// borrowed: on error the caller still holds it and can try another sink.
pub fn write_dataset(dataset: &Dataset, path: &Path, format: &OutputFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| GeozipError::sink(path, e))?;
    }

    let tmp_path = staging_path(path)?;
    let staged = File::create(&tmp_path)
        .map_err(|e| GeozipError::sink(path, e))
        .and_then(|file| {
            write_records(dataset, BufWriter::new(file), format)
                .map_err(|e| GeozipError::sink(path, e))
        })
        .and_then(|()| std::fs::rename(&tmp_path, path).map_err(|e| GeozipError::sink(path, e)));

    if let Err(e) = staged {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    info!(path = %path.display(), rows = dataset.len(), "enriched data saved");
    Ok(())
}

/// Write `dataset` as CSV to any writer.
pub fn write_to<W: Write>(dataset: &Dataset, writer: W, format: &OutputFormat) -> Result<()> {
    write_records(dataset, writer, format).map_err(|e| GeozipError::sink("<stream>", e))
}

fn write_records<W: Write>(dataset: &Dataset, writer: W, format: &OutputFormat) -> csv::Result<()> {
    let mut csv_writer = WriterBuilder::new()
        .delimiter(format.delimiter)
        .from_writer(writer);

    // An input that already has a zip_code column gets it overwritten in place.
    let zip_idx = dataset.headers.iter().position(|h| h == ZIP_CODE_COLUMN);

    let mut header: Vec<&str> = dataset.headers.iter().map(String::as_str).collect();
    if zip_idx.is_none() {
        header.push(ZIP_CODE_COLUMN);
    }
    csv_writer.write_record(&header)?;

    for record in &dataset.records {
        let zip = record.zip_code.as_deref().unwrap_or("");
        let mut row: Vec<&str> = record.fields.iter().map(String::as_str).collect();
        match zip_idx {
            Some(idx) if idx < row.len() => row[idx] = zip,
            _ => row.push(zip),
        }
        csv_writer.write_record(&row)?;
    }

    csv_writer.flush()?;
    Ok(())
}

fn staging_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| GeozipError::sink(path, "output path has no file name"))?;
    Ok(path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy())))
}
