//! Enrichment pipeline: dataset → lookup tasks → scheduler → merge by position.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use geozip_geocoder::ReverseGeocoder;
use geozip_shared::{
    Dataset, GeoResult, NoResultReason, PipelineConfig, Record, Result, RunSummary,
    TaskFailure, TaskOutcome,
};

use crate::cancel::CancelSignal;
use crate::progress::{ProgressReporter, TaskStatus};
use crate::scheduler::TaskScheduler;

/// The enriched dataset together with the run's counters.
#[derive(Debug)]
pub struct EnrichedRun {
    pub dataset: Dataset,
    pub summary: RunSummary,
}

/// Adds a postal code to every record of a dataset it can.
pub struct EnrichmentPipeline<G> {
    geocoder: Arc<G>,
    scheduler: TaskScheduler,
    cancel: CancelSignal,
}

impl<G> EnrichmentPipeline<G>
where
    G: ReverseGeocoder + 'static,
{
    /// Build a pipeline over `geocoder` with the configured concurrency cap.
    pub fn new(geocoder: Arc<G>, config: &PipelineConfig) -> Result<Self> {
        let cancel = CancelSignal::new();
        let scheduler = TaskScheduler::new(config.max_concurrency)?.with_cancel(cancel.clone());
        Ok(Self {
            geocoder,
            scheduler,
            cancel,
        })
    }

    /// Use an externally owned cancel signal (e.g. one wired to Ctrl-C).
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.scheduler = self.scheduler.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// The signal that stops this pipeline.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Enrich `dataset`, returning it with `zip_code` filled where a lookup
    /// succeeded.
    ///
    /// Never fails as a whole: per-record failures leave that record's zip
    /// code empty and are listed in the summary. Record count and order are
    /// preserved. When the cancel signal is raised, results merged so far
    /// are kept and the summary is marked cancelled.
    #[instrument(skip_all, fields(records = dataset.len(), max_concurrency = self.scheduler.max_concurrency()))]
    pub async fn enrich(&self, mut dataset: Dataset, progress: &dyn ProgressReporter) -> EnrichedRun {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let start = Instant::now();
        let total = dataset.len();

        info!(%run_id, total, "starting enrichment run");
        notify(|| progress.started(total));

        let tasks = dataset.records.iter().map(Record::lookup_task).collect();
        let mut stream = self.scheduler.run(self.geocoder.clone(), tasks);
        let mut tally = Tally::default();

        while let Some(outcome) = stream.next().await {
            if !merge_outcome(&mut dataset, &outcome) {
                continue;
            }
            let record = dataset.record(outcome.position);
            tally.record(&outcome, record);

            let status = TaskStatus::from(&outcome.result);
            let completed = tally.processed;
            notify(|| progress.task_completed(outcome.position, status, completed, total));
        }

        let cancelled = self.cancel.is_cancelled() && tally.processed < total;
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total,
            processed: tally.processed,
            succeeded: tally.succeeded,
            skipped: tally.skipped,
            no_result: tally.no_result,
            failed: tally.failures.len(),
            cancelled,
            elapsed_ms: start.elapsed().as_millis() as u64,
            failures: tally.failures,
        };

        if cancelled {
            warn!(
                %run_id,
                processed = summary.processed,
                dispatched = stream.dispatched(),
                total,
                reason = self.cancel.reason().unwrap_or("unknown"),
                "enrichment run cancelled, keeping partial results"
            );
        }
        info!(
            %run_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            no_result = summary.no_result,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "enrichment run complete"
        );

        notify(|| progress.finished(&summary));

        EnrichedRun { dataset, summary }
    }
}

/// Write one outcome into the dataset at its position.
///
/// Only the addressed record's `zip_code` changes, so merges commute and
/// re-applying the same outcome is a no-op. Returns `false` when the
/// position is outside the dataset.
pub fn merge_outcome(dataset: &mut Dataset, outcome: &TaskOutcome) -> bool {
    match dataset.record_mut(outcome.position) {
        Some(record) => {
            record.zip_code = outcome.result.zip_code().map(str::to_string);
            true
        }
        None => {
            warn!(position = %outcome.position, "outcome for unknown position discarded");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tally {
    processed: usize,
    succeeded: usize,
    skipped: usize,
    no_result: usize,
    failures: Vec<TaskFailure>,
}

impl Tally {
    fn record(&mut self, outcome: &TaskOutcome, record: Option<&Record>) {
        self.processed += 1;
        let latitude = record.and_then(|r| r.latitude);
        let longitude = record.and_then(|r| r.longitude);

        match &outcome.result {
            GeoResult::Found { zip_code } => {
                self.succeeded += 1;
                debug!(
                    position = %outcome.position,
                    ?latitude,
                    ?longitude,
                    zip_code = %zip_code,
                    "zip code resolved"
                );
            }
            GeoResult::NoResult {
                reason: NoResultReason::MissingCoordinates,
            } => {
                self.skipped += 1;
                debug!(position = %outcome.position, "record has no coordinates, skipped");
            }
            GeoResult::NoResult {
                reason: NoResultReason::NoCandidates,
            } => {
                self.no_result += 1;
                debug!(position = %outcome.position, ?latitude, ?longitude, "no postal code for coordinates");
            }
            GeoResult::Failed { attempts, error } => {
                warn!(
                    position = %outcome.position,
                    ?latitude,
                    ?longitude,
                    attempts,
                    error = %error,
                    "lookup failed, zip code left empty"
                );
                self.failures.push(TaskFailure {
                    position: outcome.position,
                    latitude,
                    longitude,
                    attempts: *attempts,
                    error: error.clone(),
                });
            }
        }
    }
}

/// Call a progress hook, containing any panic it raises.
fn notify(hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!("progress reporter panicked, continuing run");
    }
}
