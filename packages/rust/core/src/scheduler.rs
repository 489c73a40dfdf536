//! Bounded-concurrency execution of geocode lookups.
//!
//! Every task runs as its own tokio task, gated by a semaphore so that no
//! more than `max_concurrency` lookups are in flight. Results are delivered
//! over a channel in completion order, not submission order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, instrument};

use geozip_geocoder::ReverseGeocoder;
use geozip_shared::{GeoLookupTask, GeoResult, GeozipError, Result, TaskOutcome};

use crate::cancel::CancelSignal;

// ---------------------------------------------------------------------------
// TaskScheduler
// ---------------------------------------------------------------------------

/// Runs lookup tasks against a [`ReverseGeocoder`] with a hard concurrency cap.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    max_concurrency: usize,
    cancel: CancelSignal,
}

impl TaskScheduler {
    /// A scheduler allowing `max_concurrency` simultaneous lookups.
    pub fn new(max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(GeozipError::config("max_concurrency must be at least 1"));
        }
        Ok(Self {
            max_concurrency,
            cancel: CancelSignal::new(),
        })
    }

    /// Stop dispatching (and abandon in-flight lookups) when `cancel` is raised.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Start executing `tasks` and return the stream of their outcomes.
    ///
    /// Must be called from within a tokio runtime. Each dispatched task yields
    /// exactly one outcome, unless it is abandoned by cancellation. A task
    /// that panics is reported as [`GeoResult::Failed`] and never takes the
    /// rest of the run down with it.
    #[instrument(skip_all, fields(tasks = tasks.len(), max_concurrency = self.max_concurrency))]
    pub fn run<G>(&self, geocoder: Arc<G>, tasks: Vec<GeoLookupTask>) -> TaskStream
    where
        G: ReverseGeocoder + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatched = Arc::new(AtomicUsize::new(0));

        let dispatcher = tokio::spawn(
            dispatch(
                geocoder,
                tasks,
                Arc::new(Semaphore::new(self.max_concurrency)),
                self.cancel.clone(),
                tx,
                dispatched.clone(),
            )
            .in_current_span(),
        );

        TaskStream {
            rx,
            dispatched,
            dispatcher,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStream
// ---------------------------------------------------------------------------

/// Outcomes of a scheduler run, in completion order.
///
/// The stream ends once every dispatched task has reported (or been
/// abandoned). Dropping it stops dispatch and aborts in-flight lookups.
pub struct TaskStream {
    rx: mpsc::UnboundedReceiver<TaskOutcome>,
    dispatched: Arc<AtomicUsize>,
    dispatcher: JoinHandle<()>,
}

impl TaskStream {
    /// The next completed task, or `None` when the run is over.
    pub async fn next(&mut self) -> Option<TaskOutcome> {
        self.rx.recv().await
    }

    /// Tasks dispatched so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

impl Drop for TaskStream {
    fn drop(&mut self) {
        // The dispatcher owns the JoinSet of running tasks; dropping it aborts them.
        self.dispatcher.abort();
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

async fn dispatch<G>(
    geocoder: Arc<G>,
    tasks: Vec<GeoLookupTask>,
    semaphore: Arc<Semaphore>,
    cancel: CancelSignal,
    tx: mpsc::UnboundedSender<TaskOutcome>,
    dispatched: Arc<AtomicUsize>,
) where
    G: ReverseGeocoder + 'static,
{
    let total = tasks.len();
    let mut running = JoinSet::new();

    for mut task in tasks {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        task.start();
        dispatched.fetch_add(1, Ordering::SeqCst);

        running.spawn(
            run_task(geocoder.clone(), task, permit, cancel.clone(), tx.clone()).in_current_span(),
        );
    }
    drop(tx);

    let count = dispatched.load(Ordering::SeqCst);
    if cancel.is_cancelled() {
        info!(
            dispatched = count,
            remaining = total - count,
            "dispatch stopped by cancellation"
        );
    } else {
        debug!(dispatched = count, "all tasks dispatched");
    }

    // Stay alive until the tasks finish so that aborting the dispatcher reaches them.
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "task runner panicked");
            }
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_task<G>(
    geocoder: Arc<G>,
    task: GeoLookupTask,
    _permit: OwnedSemaphorePermit,
    cancel: CancelSignal,
    tx: mpsc::UnboundedSender<TaskOutcome>,
) where
    G: ReverseGeocoder + 'static,
{
    let position = task.position;
    let (latitude, longitude) = (task.latitude, task.longitude);

    // The lookup runs in its own task so a panic surfaces as a JoinError here.
    let mut lookup = AbortOnDrop(tokio::spawn(
        async move { geocoder.lookup(latitude, longitude).await }.in_current_span(),
    ));

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(%position, "in-flight lookup abandoned");
            return;
        }
        joined = &mut lookup.0 => match joined {
            Ok(result) => result,
            Err(e) => {
                error!(%position, error = %e, "lookup task panicked");
                GeoResult::Failed {
                    attempts: 0,
                    error: format!("lookup task panicked: {e}"),
                }
            }
        },
    };

    if tx.send(task.finish(result)).is_err() {
        debug!(%position, "outcome receiver dropped, discarding result");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use geozip_shared::{Position, Record};

    use super::*;
    use crate::testing::{ScriptedGeocoder, grid_dataset};

    fn tasks(n: usize) -> Vec<GeoLookupTask> {
        grid_dataset(n).records.iter().map(Record::lookup_task).collect()
    }

    async fn collect(mut stream: TaskStream) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) =
            tokio::time::timeout(Duration::from_secs(10), stream.next())
                .await
                .expect("stream should make progress")
        {
            outcomes.push(outcome);
        }
        outcomes
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = TaskScheduler::new(0).unwrap_err();
        assert!(matches!(err, GeozipError::Config { .. }));
    }

    #[tokio::test]
    async fn every_task_reported_exactly_once() {
        let geocoder = Arc::new(ScriptedGeocoder::new(Duration::from_millis(1)));
        let scheduler = TaskScheduler::new(4).unwrap();

        let outcomes = collect(scheduler.run(geocoder.clone(), tasks(50))).await;

        assert_eq!(outcomes.len(), 50);
        let positions: HashSet<Position> = outcomes.iter().map(|o| o.position).collect();
        assert_eq!(positions.len(), 50);
        assert!((0..50).all(|i| positions.contains(&Position(i))));
        assert_eq!(geocoder.calls(), 50);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_cap() {
        let geocoder = Arc::new(ScriptedGeocoder::new(Duration::from_millis(20)));
        let scheduler = TaskScheduler::new(5).unwrap();

        let outcomes = collect(scheduler.run(geocoder.clone(), tasks(40))).await;

        assert_eq!(outcomes.len(), 40);
        let peak = geocoder.max_in_flight();
        assert!(peak <= 5, "peak in-flight was {peak}");
        assert!(peak > 1, "lookups never overlapped");
    }

    #[tokio::test]
    async fn slow_task_does_not_block_later_results() {
        let geocoder = Arc::new(
            ScriptedGeocoder::new(Duration::from_millis(5)).respond(
                0.0,
                -77.0,
                Duration::from_millis(500),
                GeoResult::found("SLOW"),
            ),
        );
        let scheduler = TaskScheduler::new(2).unwrap();

        let outcomes = collect(scheduler.run(geocoder, tasks(10))).await;

        assert_eq!(outcomes.len(), 10);
        assert_ne!(outcomes[0].position, Position(0));
        assert_eq!(outcomes[9].position, Position(0));
        assert_eq!(outcomes[9].result.zip_code(), Some("SLOW"));
    }

    #[tokio::test]
    async fn failed_lookup_does_not_affect_others() {
        let failure = GeoResult::Failed {
            attempts: 3,
            error: "HTTP 503".into(),
        };
        let geocoder = Arc::new(ScriptedGeocoder::new(Duration::from_millis(1)).respond(
            2.0,
            -77.0,
            Duration::from_millis(1),
            failure.clone(),
        ));
        let scheduler = TaskScheduler::new(3).unwrap();

        let outcomes = collect(scheduler.run(geocoder, tasks(6))).await;

        assert_eq!(outcomes.len(), 6);
        for outcome in &outcomes {
            if outcome.position == Position(2) {
                assert_eq!(outcome.result, failure);
            } else {
                assert!(outcome.result.zip_code().is_some());
            }
        }
    }

    #[tokio::test]
    async fn panicking_lookup_is_reported_as_failure() {
        let geocoder =
            Arc::new(ScriptedGeocoder::new(Duration::from_millis(1)).panic_on(1.0, -77.0));
        let scheduler = TaskScheduler::new(2).unwrap();

        let outcomes = collect(scheduler.run(geocoder, tasks(4))).await;

        assert_eq!(outcomes.len(), 4);
        let crashed = outcomes
            .iter()
            .find(|o| o.position == Position(1))
            .expect("panicked task still reported");
        match &crashed.result {
            GeoResult::Failed { attempts, error } => {
                assert_eq!(*attempts, 0);
                assert!(error.contains("panicked"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(
            outcomes.iter().filter(|o| o.result.zip_code().is_some()).count(),
            3
        );
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_and_ends_stream() {
        let geocoder = Arc::new(ScriptedGeocoder::new(Duration::from_millis(50)));
        let cancel = CancelSignal::new();
        let scheduler = TaskScheduler::new(2).unwrap().with_cancel(cancel.clone());

        let mut stream = scheduler.run(geocoder.clone(), tasks(20));
        for _ in 0..2 {
            stream.next().await.expect("outcome before cancel");
        }
        cancel.cancel("test");
        let mut received = 2;

        let dispatched_at_cancel = stream.dispatched();
        let rest = collect(stream).await;
        received += rest.len();

        assert!(dispatched_at_cancel < 20);
        assert!(received < 20);
        assert!(received <= dispatched_at_cancel);
        assert!(geocoder.calls() < 20);
    }

    #[tokio::test]
    async fn cancelled_before_run_dispatches_nothing() {
        let geocoder = Arc::new(ScriptedGeocoder::new(Duration::from_millis(1)));
        let cancel = CancelSignal::new();
        cancel.cancel("early");
        let scheduler = TaskScheduler::new(4).unwrap().with_cancel(cancel);

        let stream = scheduler.run(geocoder.clone(), tasks(5));
        let outcomes = collect(stream).await;

        assert!(outcomes.is_empty());
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test]
    async fn empty_task_list_ends_immediately() {
        let geocoder = Arc::new(ScriptedGeocoder::new(Duration::from_millis(1)));
        let scheduler = TaskScheduler::new(4).unwrap();

        let stream = scheduler.run(geocoder, Vec::new());
        assert_eq!(stream.dispatched(), 0);
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn dropping_stream_aborts_in_flight_lookups() {
        let geocoder = Arc::new(ScriptedGeocoder::new(Duration::from_secs(10)));
        let scheduler = TaskScheduler::new(3).unwrap();

        let stream = scheduler.run(geocoder.clone(), tasks(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(geocoder.in_flight(), 3);
        assert_eq!(stream.dispatched(), 3);

        drop(stream);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(geocoder.in_flight(), 0);
        assert_eq!(geocoder.calls(), 3);
    }
}
