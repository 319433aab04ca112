//! Router - Fan-out of one inbound event to both pipeline paths
//!
//! The `Router` transforms each raw envelope once, then hands the canonical
//! event to the archiver (non-blocking bounded enqueue) and to the workflow
//! executor (spawned task). Neither delivery waits on the other.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tally_protocol::TransactionEvent;
use tally_sinks::{ArchiveError, ArchiverHandle, RetryPolicy};
use tally_transform::TransformError;
use tally_workflow::{ExecutionReport, WorkflowExecutor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::metrics::{BackpressureTracker, RouterMetrics, RouterMetricsSnapshot};

/// Receipt for one dispatched event
#[derive(Debug)]
pub struct Dispatch {
    /// Id of the canonical event
    pub transaction_id: String,

    /// Outcome of the archive enqueue
    pub archive: std::result::Result<(), ArchiveError>,

    /// Running workflow execution
    pub workflow: JoinHandle<ExecutionReport>,
}

impl Dispatch {
    /// True when the archiver accepted the event
    #[inline]
    pub fn archived(&self) -> bool {
        self.archive.is_ok()
    }

    /// Wait for the workflow execution report
    pub async fn report(self) -> Result<ExecutionReport> {
        Ok(self.workflow.await?)
    }
}

/// Default re-appends after an archive refusal in `run()`
pub const DEFAULT_ARCHIVE_MAX_RETRIES: u32 = 5;

/// Default delay before the first re-append
pub const DEFAULT_ARCHIVE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

/// Event the archiver never accepted
#[derive(Debug, Clone)]
pub struct Unarchived {
    pub event: TransactionEvent,
    /// Refusal from the last attempt
    pub error: String,
}

/// Handle for reading router state after `run()` consumes the router
#[derive(Debug, Clone)]
pub struct RouterHandle {
    metrics: Arc<RouterMetrics>,
    unarchived: Arc<Mutex<Vec<Unarchived>>>,
}

impl RouterHandle {
    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drain the events `run()` could not archive
    pub fn take_unarchived(&self) -> Vec<Unarchived> {
        std::mem::take(&mut *self.unarchived.lock())
    }
}

/// Dispatches inbound events to the archiver and the workflow executor
///
/// # Example
///
/// ```ignore
/// let router = Router::new(archiver.handle(), executor, cancel.clone());
/// let (tx, rx) = mpsc::channel(DEFAULT_INGEST_CHANNEL_SIZE);
/// tokio::spawn(router.run(rx));
/// ```
pub struct Router {
    archiver: ArchiverHandle,

    executor: Arc<WorkflowExecutor>,

    /// Passed to every execution
    cancel: CancellationToken,

    /// Router metrics (Arc for sharing with spawned executions)
    metrics: Arc<RouterMetrics>,

    /// Rate-limited backpressure logging
    backpressure_tracker: BackpressureTracker,

    /// Re-append policy for refused events in `run()`
    archive_retry: RetryPolicy,

    /// Refused events that exhausted `archive_retry`
    unarchived: Arc<Mutex<Vec<Unarchived>>>,
}

impl Router {
    pub fn new(
        archiver: ArchiverHandle,
        executor: Arc<WorkflowExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            archiver,
            executor,
            cancel,
            metrics: Arc::new(RouterMetrics::new()),
            backpressure_tracker: BackpressureTracker::new(),
            archive_retry: RetryPolicy {
                max_retries: DEFAULT_ARCHIVE_MAX_RETRIES,
                base_delay: DEFAULT_ARCHIVE_RETRY_DELAY,
            },
            unarchived: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set how `run()` re-appends events the archiver refused
    pub fn with_archive_retry(mut self, policy: RetryPolicy) -> Self {
        self.archive_retry = policy;
        self
    }

    /// Get a handle that outlives `run()`
    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            metrics: Arc::clone(&self.metrics),
            unarchived: Arc::clone(&self.unarchived),
        }
    }

    /// Get the current router metrics
    #[inline]
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Transform one raw envelope and deliver it to both paths
    ///
    /// A transform failure short-circuits: neither path sees the event. On
    /// success the archive outcome is known immediately and the workflow runs
    /// in its own task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, raw: &[u8]) -> std::result::Result<Dispatch, TransformError> {
        let event = self.accept(raw)?;
        let archive = self.archive(&event, raw.len() as u64);
        let transaction_id = event.transaction_id.clone();
        let workflow = self.spawn_workflow(event);

        Ok(Dispatch {
            transaction_id,
            archive,
            workflow,
        })
    }

    /// Count, transform and anomaly-check one raw envelope
    fn accept(&self, raw: &[u8]) -> std::result::Result<TransactionEvent, TransformError> {
        self.metrics.record_received(raw.len() as u64);

        let event = match tally_transform::transform_bytes(raw) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_transform_failure();
                tracing::warn!(error = %e, bytes = raw.len(), "dropping malformed event");
                return Err(e);
            }
        };

        if event.is_time_anomaly() {
            self.metrics.record_time_anomaly();
            tracing::warn!(
                transaction_id = %event.transaction_id,
                received = %event.received_datetime,
                requested = %event.requested_datetime,
                "transaction received before it was requested"
            );
        }
        Ok(event)
    }

    fn archive(&self, event: &TransactionEvent, byte_count: u64) -> std::result::Result<(), ArchiveError> {
        match self.archiver.append(event) {
            Ok(()) => {
                self.metrics.record_archive_ok();
                Ok(())
            }
            Err(e) => {
                let backpressure = e.is_backpressure();
                self.metrics.record_archive_failed(backpressure);
                if backpressure {
                    // Aggregated to one log per second
                    self.backpressure_tracker.record_refusal(byte_count);
                } else {
                    tracing::warn!(
                        transaction_id = %event.transaction_id,
                        error = %e,
                        "archive delivery failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Re-append a refused event with backoff until accepted or out of retries
    ///
    /// Only backpressure is retried; a closed archiver will never accept the
    /// event. Events that are never accepted are retained, not dropped.
    async fn archive_with_retry(&self, event: TransactionEvent, mut error: ArchiveError) {
        let mut retry = 0;
        while error.is_backpressure() && retry < self.archive_retry.max_retries {
            tokio::time::sleep(self.archive_retry.delay_for(retry)).await;
            retry += 1;
            match self.archiver.append(&event) {
                Ok(()) => {
                    self.metrics.record_archive_retried();
                    tracing::debug!(
                        transaction_id = %event.transaction_id,
                        retries = retry,
                        "archive accepted event after backpressure"
                    );
                    return;
                }
                Err(e) => error = e,
            }
        }

        self.metrics.record_archive_retained();
        tracing::error!(
            transaction_id = %event.transaction_id,
            retries = retry,
            error = %error,
            "archive never accepted event, retaining it"
        );
        self.unarchived.lock().push(Unarchived {
            event,
            error: error.to_string(),
        });
    }

    fn spawn_workflow(&self, event: TransactionEvent) -> JoinHandle<ExecutionReport> {
        let executor = Arc::clone(&self.executor);
        let metrics = Arc::clone(&self.metrics);
        let cancel = self.cancel.clone();

        self.metrics.record_workflow_started();
        tokio::spawn(async move {
            let report = executor.execute(&event, &cancel).await;
            metrics.record_workflow_finished(report.status);
            report
        })
    }

    /// Run the router until the input channel closes
    ///
    /// Each event's workflow is spawned before archiving. An archive refusal
    /// is retried with backoff, which holds back the input channel while the
    /// archiver catches up; events still refused are kept for
    /// [`RouterHandle::take_unarchived`]. Waits for every spawned execution
    /// before returning the final metrics.
    pub async fn run(self, mut receiver: mpsc::Receiver<Bytes>) -> RouterMetricsSnapshot {
        tracing::info!(
            table = %self.archiver.table().name,
            "router starting"
        );

        let mut in_flight: Vec<JoinHandle<ExecutionReport>> = Vec::new();
        while let Some(raw) = receiver.recv().await {
            let Ok(event) = self.accept(&raw) else {
                continue;
            };
            in_flight.push(self.spawn_workflow(event.clone()));
            if let Err(e) = self.archive(&event, raw.len() as u64) {
                self.archive_with_retry(event, e).await;
            }
            if in_flight.len() >= IN_FLIGHT_PRUNE_THRESHOLD {
                in_flight.retain(|h| !h.is_finished());
            }
        }

        tracing::debug!(in_flight = in_flight.len(), "waiting for workflow executions");
        for handle in in_flight {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "workflow task failed");
            }
        }

        // Log final metrics
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            events_received = snapshot.events_received,
            transform_failures = snapshot.transform_failures,
            archive_ok = snapshot.archive_ok,
            archive_failed = snapshot.archive_failed,
            backpressure_events = snapshot.backpressure_events,
            archive_retried = snapshot.archive_retried,
            archive_retained = snapshot.archive_retained,
            time_anomalies = snapshot.time_anomalies,
            workflows_succeeded = snapshot.workflows_succeeded,
            workflows_failed = snapshot.workflows_failed,
            workflows_cancelled = snapshot.workflows_cancelled,
            "router shutting down"
        );
        snapshot
    }
}

/// Finished handles are dropped once this many accumulate
const IN_FLIGHT_PRUNE_THRESHOLD: usize = 1024;

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("table", &self.archiver.table().name)
            .field("executor", &self.executor)
            .finish()
    }
}
