//! Delimited-file extraction with explicit text encoding.

use std::path::Path;

use csv::ReaderBuilder;
use encoding_rs::{Encoding, WINDOWS_1252};
use tracing::{info, warn};

use geozip_shared::{Dataset, GeozipError, InputConfig, Position, Record, Result, delimiter_byte};

/// Column holding the latitude of each record.
pub const LATITUDE_COLUMN: &str = "latitude";

/// Column holding the longitude of each record.
pub const LONGITUDE_COLUMN: &str = "longitude";

/// How to decode and split the input file.
#[derive(Debug, Clone, Copy)]
pub struct InputFormat {
    /// Field separator.
    pub delimiter: u8,
    /// Text encoding of the raw bytes.
    pub encoding: &'static Encoding,
}

impl Default for InputFormat {
    /// Semicolon-separated, single-byte Western encoding.
    fn default() -> Self {
        Self {
            delimiter: b';',
            encoding: WINDOWS_1252,
        }
    }
}

impl InputFormat {
    /// Resolve the `[input]` config section.
    pub fn from_config(config: &InputConfig) -> Result<Self> {
        let delimiter = delimiter_byte(&config.delimiter)?;
        let encoding = Encoding::for_label(config.encoding.trim().as_bytes()).ok_or_else(|| {
            GeozipError::config(format!("unknown input encoding '{}'", config.encoding))
        })?;
        Ok(Self {
            delimiter,
            encoding,
        })
    }
}

/// Read and decode a delimited file into a [`Dataset`].
///
/// Positions are assigned in file order, starting at zero.
pub fn read_dataset(path: &Path, format: &InputFormat) -> Result<Dataset> {
    let bytes = std::fs::read(path).map_err(|e| GeozipError::io(path, e))?;

    let (content, encoding, had_errors) = format.encoding.decode(&bytes);
    if had_errors {
        warn!(
            path = %path.display(),
            encoding = encoding.name(),
            "input contains bytes invalid for its encoding, replaced with U+FFFD"
        );
    }

    let dataset = parse_dataset(&content, format.delimiter)?;

    info!(
        path = %path.display(),
        rows = dataset.len(),
        columns = dataset.headers.len(),
        encoding = encoding.name(),
        "data loaded"
    );

    Ok(dataset)
}

/// Parse already-decoded delimited text into a [`Dataset`].
pub fn parse_dataset(content: &str, delimiter: u8) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| GeozipError::parse(format!("failed to read header row: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(GeozipError::validation("input has no header row"));
    }

    let lat_idx = column_index(&headers, LATITUDE_COLUMN)?;
    let lon_idx = column_index(&headers, LONGITUDE_COLUMN)?;

    let mut records = Vec::new();

    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| {
            GeozipError::parse(format!("failed to parse data row {}: {e}", index + 1))
        })?;

        if row.len() > headers.len() {
            return Err(GeozipError::parse(format!(
                "data row {} has {} fields, header has {}",
                index + 1,
                row.len(),
                headers.len()
            )));
        }

        // Short rows are padded, matching how a missing trailing cell reads as empty.
        let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
        fields.resize(headers.len(), String::new());

        let latitude = parse_coordinate(&fields[lat_idx]);
        let longitude = parse_coordinate(&fields[lon_idx]);

        records.push(Record::new(Position(index), fields, latitude, longitude));
    }

    Ok(Dataset { headers, records })
}

/// Parse a coordinate cell. Empty, non-numeric, and non-finite values are absent.
pub fn parse_coordinate(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn column_index(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            GeozipError::validation(format!("column `{name}` not found in input header"))
        })
}
