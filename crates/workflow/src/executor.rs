//! Workflow executor
//!
//! Runs one [`TransactionEvent`] through the fixed step sequence:
//!
//! ```text
//! Start → WriteRecord → PublishProcessed → Done
//! ```
//!
//! Each step is retried with exponential backoff. A write that exhausts its
//! retries fails the execution before anything is published. A publish that
//! exhausts its retries leaves the record in place and parks the event so
//! [`WorkflowExecutor::retry_publish`] can re-run only the publish step.
//!
//! # Cancellation
//!
//! The token is checked before every attempt and during backoff sleeps.
//! In-flight store and publisher calls are never aborted. Cancellation
//! observed before the record is written ends the execution as `Cancelled`;
//! observed afterwards, the publish is parked as `PendingPublish`.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tally_protocol::{ProcessedEvent, TransactionEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Retryable, WorkflowError, WorkflowStepError};
use crate::metrics::{ExecutorMetrics, ExecutorMetricsSnapshot};
use crate::publisher::Publisher;
use crate::step::{
    DEFAULT_AUDIT_WINDOW, ExecutionReport, ExecutionStatus, Step, StepEntry, StepOutcome,
    StepRetryPolicy,
};
use crate::store::RecordStore;

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Retry policy applied to each step
    pub retry: StepRetryPolicy,
    /// Reports kept for audit (0 keeps none)
    pub audit_window: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: StepRetryPolicy::default(),
            audit_window: DEFAULT_AUDIT_WINDOW,
        }
    }
}

impl ExecutorConfig {
    pub fn with_retry(mut self, retry: StepRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_audit_window(mut self, audit_window: usize) -> Self {
        self.audit_window = audit_window;
        self
    }
}

/// Result of running one step with retries
enum StepRun {
    Completed { attempts: u32 },
    Exhausted { attempts: u32, reason: String },
    Cancelled { attempts: u32 },
}

/// Accumulates the trace of one execution
struct Execution {
    transaction_id: String,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
    trace: Vec<StepEntry>,
}

impl Execution {
    fn begin(transaction_id: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            trace: Vec::with_capacity(4),
        }
    }

    fn record(&mut self, step: Step, attempts: u32, outcome: StepOutcome, duration: Duration) {
        self.trace.push(StepEntry {
            step,
            attempts,
            outcome,
            duration,
        });
    }

    fn finish(
        mut self,
        status: ExecutionStatus,
        final_step: Step,
        failure: Option<(Step, WorkflowStepError)>,
    ) -> ExecutionReport {
        if final_step.is_terminal() {
            let outcome = match &failure {
                Some((_, error)) => StepOutcome::Failed(error.to_string()),
                None => StepOutcome::Completed,
            };
            self.record(final_step, 0, outcome, Duration::ZERO);
        }
        let (failed_step, error) = match failure {
            Some((step, error)) => (Some(step), Some(error)),
            None => (None, None),
        };
        ExecutionReport {
            transaction_id: self.transaction_id,
            status,
            final_step,
            failed_step,
            error,
            trace: self.trace,
            started_at: self.started_at,
            duration: self.started.elapsed(),
        }
    }
}

/// Sequential write-then-publish executor
///
/// Shared by every dispatcher; each call to [`execute`](Self::execute) owns
/// its own execution state.
pub struct WorkflowExecutor {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn Publisher>,
    config: ExecutorConfig,
    /// Events whose record is written but whose publish has not succeeded
    pending: Mutex<BTreeMap<String, TransactionEvent>>,
    audit: Mutex<VecDeque<ExecutionReport>>,
    metrics: ExecutorMetrics,
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("store", &self.store.name())
            .field("publisher", &self.publisher.name())
            .field("config", &self.config)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn Publisher>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            pending: Mutex::new(BTreeMap::new()),
            audit: Mutex::new(VecDeque::new()),
            metrics: ExecutorMetrics::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn metrics(&self) -> ExecutorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Transaction ids with a parked publish, in id order
    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }

    /// Most recent reports, oldest first
    pub fn recent_reports(&self) -> Vec<ExecutionReport> {
        self.audit.lock().iter().cloned().collect()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run the full workflow for one event
    pub async fn execute(
        &self,
        event: &TransactionEvent,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        self.metrics.record_started();
        let mut exec = Execution::begin(&event.transaction_id);

        // Start
        if let Err(e) = event.validate() {
            exec.record(Step::Start, 0, StepOutcome::Failed(e.to_string()), Duration::ZERO);
            let error = WorkflowStepError::InvalidEvent {
                reason: e.to_string(),
            };
            return self.conclude(exec.finish(
                ExecutionStatus::Failed,
                Step::Failed,
                Some((Step::Start, error)),
            ));
        }
        if cancel.is_cancelled() {
            exec.record(Step::Start, 0, StepOutcome::Cancelled, Duration::ZERO);
            return self.conclude(exec.finish(ExecutionStatus::Cancelled, Step::Start, None));
        }
        exec.record(Step::Start, 0, StepOutcome::Completed, Duration::ZERO);

        // WriteRecord
        let key = event.transaction_id.as_str();
        let began = Instant::now();
        let run = self
            .run_step(Step::WriteRecord, key, cancel, || self.store.put(key, event))
            .await;
        match run {
            StepRun::Completed { attempts } => {
                self.metrics.record_written();
                exec.record(Step::WriteRecord, attempts, StepOutcome::Completed, began.elapsed());
            }
            StepRun::Cancelled { attempts } => {
                exec.record(Step::WriteRecord, attempts, StepOutcome::Cancelled, began.elapsed());
                return self.conclude(exec.finish(
                    ExecutionStatus::Cancelled,
                    Step::WriteRecord,
                    None,
                ));
            }
            StepRun::Exhausted { attempts, reason } => {
                exec.record(
                    Step::WriteRecord,
                    attempts,
                    StepOutcome::Failed(reason.clone()),
                    began.elapsed(),
                );
                let error = WorkflowStepError::WriteRecordFailed { attempts, reason };
                return self.conclude(exec.finish(
                    ExecutionStatus::Failed,
                    Step::Failed,
                    Some((Step::WriteRecord, error)),
                ));
            }
        }

        // PublishProcessed
        let report = self.publish_step(event, exec, cancel).await;
        self.conclude(report)
    }

    /// Re-run only the publish step for a parked event
    pub async fn retry_publish(&self, transaction_id: &str) -> Result<ExecutionReport, WorkflowError> {
        let event = self
            .pending
            .lock()
            .remove(transaction_id)
            .ok_or_else(|| WorkflowError::NotPending(transaction_id.to_string()))?;

        self.metrics.record_replay();
        self.metrics.record_started();
        let exec = Execution::begin(&event.transaction_id);
        let report = self
            .publish_step(&event, exec, &CancellationToken::new())
            .await;
        Ok(self.conclude(report))
    }

    /// Retry every parked publish
    pub async fn replay_pending(&self) -> Vec<ExecutionReport> {
        let ids = self.pending();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            // A concurrent replay may have taken it already
            if let Ok(report) = self.retry_publish(&id).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Publish the processed event; parks the event unless it succeeds
    async fn publish_step(
        &self,
        event: &TransactionEvent,
        mut exec: Execution,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let processed = ProcessedEvent::from(event);
        let began = Instant::now();
        let run = self
            .run_step(
                Step::PublishProcessed,
                &event.transaction_id,
                cancel,
                || self.publisher.publish(&processed),
            )
            .await;

        match run {
            StepRun::Completed { attempts } => {
                self.metrics.record_published();
                exec.record(
                    Step::PublishProcessed,
                    attempts,
                    StepOutcome::Completed,
                    began.elapsed(),
                );
                exec.finish(ExecutionStatus::Succeeded, Step::Done, None)
            }
            StepRun::Cancelled { attempts } => {
                self.park(event);
                exec.record(
                    Step::PublishProcessed,
                    attempts,
                    StepOutcome::Cancelled,
                    began.elapsed(),
                );
                exec.finish(ExecutionStatus::PendingPublish, Step::PublishProcessed, None)
            }
            StepRun::Exhausted { attempts, reason } => {
                self.park(event);
                exec.record(
                    Step::PublishProcessed,
                    attempts,
                    StepOutcome::Failed(reason.clone()),
                    began.elapsed(),
                );
                let error = WorkflowStepError::PublishFailed { attempts, reason };
                exec.finish(
                    ExecutionStatus::Failed,
                    Step::Failed,
                    Some((Step::PublishProcessed, error)),
                )
            }
        }
    }

    /// Run one step under the retry policy
    async fn run_step<F, Fut, E>(
        &self,
        step: Step,
        transaction_id: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> StepRun
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Retryable,
    {
        let policy = self.config.retry;
        let max_attempts = policy.attempts();
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                self.metrics.record_step_retry();
                let delay = policy.delay_for(attempt - 1);
                debug!(
                    step = %step,
                    transaction_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying step"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return StepRun::Cancelled { attempts: attempt },
                    _ = tokio::time::sleep(delay) => {}
                }
            } else if cancel.is_cancelled() {
                return StepRun::Cancelled { attempts: 0 };
            }

            match operation().await {
                Ok(()) => return StepRun::Completed { attempts: attempt + 1 },
                Err(e) if !e.is_retryable() => {
                    warn!(
                        step = %step,
                        transaction_id,
                        attempts = attempt + 1,
                        error = %e,
                        "step failed with a permanent error"
                    );
                    return StepRun::Exhausted {
                        attempts: attempt + 1,
                        reason: e.to_string(),
                    };
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        warn!(
            step = %step,
            transaction_id,
            attempts = max_attempts,
            error = %last_error,
            "step failed after retries"
        );
        StepRun::Exhausted {
            attempts: max_attempts,
            reason: last_error,
        }
    }

    fn park(&self, event: &TransactionEvent) {
        self.metrics.record_parked();
        self.pending
            .lock()
            .insert(event.transaction_id.clone(), event.clone());
    }

    /// Count, log and archive a finished report
    fn conclude(&self, report: ExecutionReport) -> ExecutionReport {
        self.metrics.record_finished(report.status);

        match report.status {
            ExecutionStatus::Succeeded => debug!(
                transaction_id = %report.transaction_id,
                duration_us = report.duration.as_micros() as u64,
                "workflow succeeded"
            ),
            ExecutionStatus::PendingPublish => info!(
                transaction_id = %report.transaction_id,
                "workflow cancelled after record write, publish parked"
            ),
            ExecutionStatus::Cancelled => debug!(
                transaction_id = %report.transaction_id,
                "workflow cancelled before record write"
            ),
            ExecutionStatus::Failed => warn!(
                transaction_id = %report.transaction_id,
                failed_step = ?report.failed_step,
                error = report.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "workflow failed"
            ),
        }

        if self.config.audit_window > 0 {
            let mut audit = self.audit.lock();
            while audit.len() >= self.config.audit_window {
                audit.pop_front();
            }
            audit.push_back(report.clone());
        }
        report
    }
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod executor_test;
