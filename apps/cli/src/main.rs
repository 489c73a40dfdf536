//! geozip CLI: enrich a coordinate dataset with postal codes.
//!
//! Reads a delimited file, reverse-geocodes every record through a bounded
//! pool of lookups, and writes the dataset back out with a `zip_code` column.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    // The subscription key may live in a .env file next to the data.
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to read .env file"),
    }

    commands::run(cli).await
}
