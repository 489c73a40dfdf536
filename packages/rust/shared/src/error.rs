//! Error types for geozip.
//!
//! Library crates use [`GeozipError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-record lookup failures are not errors: they travel as
//! [`GeoResult::Failed`](crate::GeoResult::Failed) values so a single bad row
//! never aborts a batch. Only configuration, extraction, and sink problems
//! surface here.

use std::path::PathBuf;

/// Top-level error type for all geozip operations.
#[derive(Debug, thiserror::Error)]
pub enum GeozipError {
    /// Configuration loading or validation error (including a missing credential).
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the geocoding provider.
    #[error("network error: {0}")]
    Network(String),

    /// Delimited-input or provider-payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing columns, bad shape, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The enriched dataset could not be written to its destination.
    #[error("failed to write {path:?}: {message}")]
    Sink { path: PathBuf, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GeozipError>;

impl GeozipError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a sink error for the given destination.
    pub fn sink(path: impl Into<PathBuf>, msg: impl std::fmt::Display) -> Self {
        Self::Sink {
            path: path.into(),
            message: msg.to_string(),
        }
    }
}
