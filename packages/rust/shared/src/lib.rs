//! Shared types, error model, and configuration for geozip.
//!
//! This crate is the foundation depended on by all other geozip crates.
//! It provides:
//! - [`GeozipError`]: the unified error type
//! - Domain types ([`Record`], [`Dataset`], [`GeoLookupTask`], [`GeoResult`], [`RunSummary`])
//! - Configuration ([`AppConfig`], [`Credential`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credential, GeocoderConfig, InputConfig, OutputConfig, PipelineConfig,
    RetryConfig, config_dir, config_file_path, delimiter_byte, init_config, load_config,
    load_config_from, resolve_credential,
};
pub use error::{GeozipError, Result};
pub use types::{
    Dataset, GeoLookupTask, GeoResult, NoResultReason, Position, Record, RunSummary,
    TaskFailure, TaskOutcome, TaskState, ZIP_CODE_COLUMN,
};
