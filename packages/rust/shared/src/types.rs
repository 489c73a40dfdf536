//! Core domain types for geozip enrichment runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column name added to every output record.
pub const ZIP_CODE_COLUMN: &str = "zip_code";

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Zero-based index assigned to a record at extraction time.
///
/// Positions are never reused or reordered; results are merged back by
/// position, so output order always equals input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(pub usize);

impl Position {
    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Record / Dataset
// ---------------------------------------------------------------------------

/// One row of the dataset being enriched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable position in the input.
    pub position: Position,
    /// Original cell values, aligned with [`Dataset::headers`].
    pub fields: Vec<String>,
    /// Parsed latitude, absent when the cell is empty or not a finite number.
    pub latitude: Option<f64>,
    /// Parsed longitude, absent when the cell is empty or not a finite number.
    pub longitude: Option<f64>,
    /// Postal code added by enrichment.
    #[serde(default)]
    pub zip_code: Option<String>,
}

impl Record {
    /// Build a record with no zip code yet.
    pub fn new(
        position: Position,
        fields: Vec<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Self {
        Self {
            position,
            fields,
            latitude,
            longitude,
            zip_code: None,
        }
    }

    /// The lookup task for this record. Coordinates are copied, not borrowed.
    pub fn lookup_task(&self) -> GeoLookupTask {
        GeoLookupTask::new(self.position, self.latitude, self.longitude)
    }
}

/// A tabular dataset: headers plus records ordered by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Column names in input order.
    pub headers: Vec<String>,
    /// Records; the record at index `i` has position `i`.
    pub records: Vec<Record>,
}

impl Dataset {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mutable access to the record at `position`.
    pub fn record_mut(&mut self, position: Position) -> Option<&mut Record> {
        self.records.get_mut(position.index())
    }

    /// Record at `position`.
    pub fn record(&self, position: Position) -> Option<&Record> {
        self.records.get(position.index())
    }
}

// ---------------------------------------------------------------------------
// GeoLookupTask
// ---------------------------------------------------------------------------

/// Lifecycle of a lookup task inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A unit of work: one record's position and coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLookupTask {
    pub position: Position,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub state: TaskState,
}

impl GeoLookupTask {
    /// A new pending task.
    pub fn new(position: Position, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        Self {
            position,
            latitude,
            longitude,
            state: TaskState::Pending,
        }
    }

    /// Mark the task as dispatched.
    pub fn start(&mut self) {
        self.state = TaskState::Running;
    }

    /// Consume the task with its result.
    pub fn finish(mut self, result: GeoResult) -> TaskOutcome {
        self.state = if result.is_failure() {
            TaskState::Failed
        } else {
            TaskState::Succeeded
        };
        tracing::trace!(position = %self.position, state = ?self.state, "task finished");
        TaskOutcome {
            position: self.position,
            result,
        }
    }
}

// ---------------------------------------------------------------------------
// GeoResult
// ---------------------------------------------------------------------------

/// Why a lookup produced no postal code without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoResultReason {
    /// Latitude or longitude was absent; no request was made.
    MissingCoordinates,
    /// The provider answered but returned no candidate with a postal code.
    NoCandidates,
}

/// Outcome of one reverse-geocode lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GeoResult {
    /// The first candidate carried a postal code.
    Found { zip_code: String },
    /// Nothing to report, and nothing went wrong.
    NoResult { reason: NoResultReason },
    /// Every attempt hit a transient failure.
    Failed { attempts: u32, error: String },
}

impl GeoResult {
    /// Shorthand for a found postal code.
    pub fn found(zip_code: impl Into<String>) -> Self {
        Self::Found {
            zip_code: zip_code.into(),
        }
    }

    /// Shorthand for a no-result outcome.
    pub fn no_result(reason: NoResultReason) -> Self {
        Self::NoResult { reason }
    }

    /// The postal code to write into the output, if any.
    pub fn zip_code(&self) -> Option<&str> {
        match self {
            Self::Found { zip_code } => Some(zip_code),
            _ => None,
        }
    }

    /// Whether the lookup exhausted its retries.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// A completed task as delivered by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub position: Position,
    pub result: GeoResult,
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// One failed lookup, with enough detail to diagnose without re-running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub position: Position,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub attempts: u32,
    pub error: String,
}

/// Aggregate counters for one enrichment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Time-sortable run identifier.
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records in the input.
    pub total: usize,
    /// Lookups whose result was merged.
    pub processed: usize,
    /// Lookups that produced a postal code.
    pub succeeded: usize,
    /// Records skipped for missing coordinates.
    pub skipped: usize,
    /// Provider answered without a postal code.
    pub no_result: usize,
    /// Lookups that exhausted their retries.
    pub failed: usize,
    /// Whether the run stopped early on a cancel signal.
    pub cancelled: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TaskFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_result_zip_code_collapses_non_success() {
        assert_eq!(GeoResult::found("22030").zip_code(), Some("22030"));
        assert_eq!(
            GeoResult::no_result(NoResultReason::NoCandidates).zip_code(),
            None
        );
        let failed = GeoResult::Failed {
            attempts: 3,
            error: "HTTP 503".into(),
        };
        assert_eq!(failed.zip_code(), None);
        assert!(failed.is_failure());
        assert!(!GeoResult::no_result(NoResultReason::MissingCoordinates).is_failure());
    }

    #[test]
    fn geo_result_serializes_tagged() {
        let json = serde_json::to_value(GeoResult::found("20170")).expect("serialize");
        assert_eq!(json["outcome"], "found");
        assert_eq!(json["zip_code"], "20170");

        let json = serde_json::to_value(GeoResult::no_result(NoResultReason::MissingCoordinates))
            .expect("serialize");
        assert_eq!(json["reason"], "missing_coordinates");
    }

    #[test]
    fn task_lifecycle() {
        let record = Record::new(
            Position(4),
            vec!["a".into()],
            Some(38.85),
            Some(-77.30),
        );
        let mut task = record.lookup_task();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.position, Position(4));
        task.start();
        assert_eq!(task.state, TaskState::Running);

        let outcome = task.finish(GeoResult::found("22030"));
        assert_eq!(outcome.position, Position(4));
        assert_eq!(outcome.result.zip_code(), Some("22030"));
    }

    #[test]
    fn dataset_addresses_by_position() {
        let mut dataset = Dataset {
            headers: vec!["id".into()],
            records: (0..3)
                .map(|i| Record::new(Position(i), vec![i.to_string()], None, None))
                .collect(),
        };
        assert_eq!(dataset.len(), 3);
        dataset.record_mut(Position(1)).unwrap().zip_code = Some("x".into());
        assert_eq!(dataset.record(Position(1)).unwrap().zip_code.as_deref(), Some("x"));
        assert!(dataset.record_mut(Position(3)).is_none());
    }
}
