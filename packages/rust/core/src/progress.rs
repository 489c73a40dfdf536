//! Progress callbacks for enrichment runs.
//!
//! Reporters only observe; nothing they do (or fail to do) affects the
//! merged dataset.

use geozip_shared::{GeoResult, NoResultReason, Position, RunSummary};

/// How a single task ended, as seen by a progress reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// A postal code was found.
    Succeeded,
    /// The record had no coordinates.
    Skipped,
    /// The provider answered without a postal code.
    NoResult,
    /// Retries were exhausted.
    Failed,
}

impl From<&GeoResult> for TaskStatus {
    fn from(result: &GeoResult) -> Self {
        match result {
            GeoResult::Found { .. } => Self::Succeeded,
            GeoResult::NoResult {
                reason: NoResultReason::MissingCoordinates,
            } => Self::Skipped,
            GeoResult::NoResult {
                reason: NoResultReason::NoCandidates,
            } => Self::NoResult,
            GeoResult::Failed { .. } => Self::Failed,
        }
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called once before any task is dispatched.
    fn started(&self, total: usize);
    /// Called for every merged task result.
    fn task_completed(&self, position: Position, status: TaskStatus, completed: usize, total: usize);
    /// Called when the run completes.
    fn finished(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _total: usize) {}
    fn task_completed(
        &self,
        _position: Position,
        _status: TaskStatus,
        _completed: usize,
        _total: usize,
    ) {
    }
    fn finished(&self, _summary: &RunSummary) {}
}
