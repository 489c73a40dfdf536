//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use geozip_core::{CancelSignal, EnrichmentPipeline, ProgressReporter, TaskStatus};
use geozip_dataset::{InputFormat, OutputFormat, read_dataset, write_dataset, write_to};
use geozip_geocoder::{GeoClient, RetryPolicy, ReverseGeocoder};
use geozip_shared::{
    AppConfig, Dataset, GeoResult, Position, RunSummary, init_config, load_config,
    load_config_from, resolve_credential,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// geozip: add postal codes to a coordinate dataset.
#[derive(Parser)]
#[command(
    name = "geozip",
    version,
    about = "Enrich a delimited dataset with postal codes from a reverse-geocoding service.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.geozip/geozip.toml.
    #[arg(long, global = true, env = "GEOZIP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Add a zip_code column to every record of a dataset.
    Enrich(EnrichArgs),

    /// Reverse-geocode a single coordinate pair.
    #[command(allow_negative_numbers = true)]
    Lookup {
        /// Latitude in decimal degrees.
        latitude: f64,
        /// Longitude in decimal degrees.
        longitude: f64,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments of `geozip enrich`.
#[derive(Args, Debug)]
pub(crate) struct EnrichArgs {
    /// Input file with `latitude` and `longitude` columns.
    pub input: PathBuf,

    /// Where to write the enriched file ("-" for stdout).
    #[arg(short, long)]
    pub output: PathBuf,

    /// Alternate destination used if the primary output cannot be written.
    #[arg(long)]
    pub fallback_output: Option<PathBuf>,

    /// Write the run summary as JSON to this path.
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Maximum lookups in flight.
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Attempts per lookup, including the first.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Base backoff between attempts, in milliseconds.
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Input field delimiter (use "\t" for tabs).
    #[arg(long)]
    pub delimiter: Option<String>,

    /// Input text encoding label, e.g. latin1 or utf-8.
    #[arg(long)]
    pub encoding: Option<String>,

    /// Output field delimiter.
    #[arg(long)]
    pub output_delimiter: Option<String>,
}

impl EnrichArgs {
    /// Layer command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(n) = self.concurrency {
            config.pipeline.max_concurrency = n;
        }
        if let Some(n) = self.retries {
            config.retry.max_attempts = n;
        }
        if let Some(ms) = self.backoff_ms {
            config.retry.backoff_base_ms = ms;
        }
        if let Some(d) = &self.delimiter {
            config.input.delimiter = d.clone();
        }
        if let Some(e) = &self.encoding {
            config.input.encoding = e.clone();
        }
        if let Some(d) = &self.output_delimiter {
            config.output.delimiter = d.clone();
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries
/// only command output.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "geozip=info",
        1 => "geozip=debug",
        _ => "geozip=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Enrich(args) => cmd_enrich(config_path, &args).await,
        Command::Lookup {
            latitude,
            longitude,
        } => cmd_lookup(config_path, latitude, longitude).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

fn build_client(config: &AppConfig) -> Result<GeoClient> {
    let credential = resolve_credential(&config.geocoder)?;
    let client = GeoClient::new(&config.geocoder, RetryPolicy::from(&config.retry), credential)?;
    Ok(client)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_enrich(config_path: Option<&Path>, args: &EnrichArgs) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    args.apply(&mut config);
    config.validate()?;

    // Fail on a missing key before reading any data.
    let client = build_client(&config)?;
    let input_format = InputFormat::from_config(&config.input)?;
    let output_format = OutputFormat::from_config(&config.output)?;

    let dataset = read_dataset(&args.input, &input_format)?;

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        records = dataset.len(),
        max_concurrency = config.pipeline.max_concurrency,
        max_attempts = config.retry.max_attempts,
        "enriching dataset"
    );

    let cancel = CancelSignal::new();
    spawn_interrupt_handler(cancel.clone());

    let pipeline = EnrichmentPipeline::new(Arc::new(client), &config.pipeline)?
        .with_cancel(cancel);
    let reporter = CliProgress::new();
    let run = pipeline.enrich(dataset, &reporter).await;

    let written = save_dataset(
        &run.dataset,
        &args.output,
        args.fallback_output.as_deref(),
        &output_format,
    )?;

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&run.summary)?;
        std::fs::write(path, json)
            .wrap_err_with(|| format!("failed to write summary to {}", path.display()))?;
    }

    print_summary(&run.summary, &written);

    if run.summary.cancelled {
        return Err(eyre!(
            "run interrupted after {} of {} records; partial results written to {}",
            run.summary.processed,
            run.summary.total,
            written.display()
        ));
    }

    Ok(())
}

/// Output path that means "write to stdout".
const STDOUT_PATH: &str = "-";

fn is_stdout(path: &Path) -> bool {
    path == Path::new(STDOUT_PATH)
}

fn write_output(dataset: &Dataset, path: &Path, format: &OutputFormat) -> geozip_shared::Result<()> {
    if is_stdout(path) {
        write_to(dataset, std::io::stdout().lock(), format)
    } else {
        write_dataset(dataset, path, format)
    }
}

/// Write to the primary output, falling back to the alternate path if given.
fn save_dataset(
    dataset: &Dataset,
    output: &Path,
    fallback: Option<&Path>,
    format: &OutputFormat,
) -> Result<PathBuf> {
    match write_output(dataset, output, format) {
        Ok(()) => Ok(output.to_path_buf()),
        Err(e) => {
            let Some(fallback) = fallback else {
                return Err(e.into());
            };
            warn!(
                error = %e,
                fallback = %fallback.display(),
                "primary output failed, writing to fallback"
            );
            write_output(dataset, fallback, format)?;
            Ok(fallback.to_path_buf())
        }
    }
}

fn print_summary(summary: &RunSummary, written: &Path) {
    let heading = if summary.cancelled {
        "Enrichment interrupted."
    } else {
        "Enrichment complete!"
    };
    let lines = [
        String::new(),
        format!("  {heading}"),
        format!("  Run:        {}", summary.run_id),
        format!("  Records:    {}", summary.total),
        format!("  Processed:  {}", summary.processed),
        format!("  Zip codes:  {}", summary.succeeded),
        format!("  No result:  {}", summary.no_result),
        format!("  Skipped:    {}", summary.skipped),
        format!("  Failed:     {}", summary.failed),
        format!("  Output:     {}", written.display()),
        format!("  Time:       {:.1}s", summary.elapsed_ms as f64 / 1000.0),
        String::new(),
    ];
    let text = lines.join("\n");

    // Stdout already carries the dataset.
    if is_stdout(written) {
        eprintln!("{text}");
    } else {
        println!("{text}");
    }
}

/// Raise `cancel` on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancelSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel("interrupted by user");
        }
    });
}

async fn cmd_lookup(config_path: Option<&Path>, latitude: f64, longitude: f64) -> Result<()> {
    let config = resolve_config(config_path)?;
    config.validate()?;
    let client = build_client(&config)?;

    info!(latitude, longitude, "looking up postal code");

    match client.lookup(Some(latitude), Some(longitude)).await {
        GeoResult::Found { zip_code } => println!("{zip_code}"),
        GeoResult::NoResult { reason } => {
            println!("no postal code for {latitude},{longitude} ({reason:?})");
        }
        GeoResult::Failed { attempts, error } => {
            return Err(eyre!("lookup failed after {attempts} attempt(s): {error}"));
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter drawing an indicatif bar on stderr.
struct CliProgress {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self {
            bar,
            failed: AtomicUsize::new(0),
        }
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("geocoding");
    }

    fn task_completed(&self, _position: Position, status: TaskStatus, completed: usize, _total: usize) {
        if status == TaskStatus::Failed {
            let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
            self.bar.set_message(format!("{failed} failed"));
        }
        self.bar.set_position(completed as u64);
    }

    fn finished(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}
