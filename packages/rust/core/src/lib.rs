//! Enrichment orchestration for geozip.
//!
//! This crate drives lookups for a whole dataset: it fans tasks out to a
//! bounded pool, merges each result back by position, and reports progress
//! and a run summary along the way.

pub mod cancel;
pub mod pipeline;
pub mod progress;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use cancel::CancelSignal;
pub use pipeline::{EnrichedRun, EnrichmentPipeline, merge_outcome};
pub use progress::{ProgressReporter, SilentProgress, TaskStatus};
pub use scheduler::{TaskScheduler, TaskStream};
