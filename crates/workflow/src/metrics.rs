//! Workflow executor metrics
//!
//! Atomic counters, relaxed ordering. Values are eventually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::step::ExecutionStatus;

/// Counters for the workflow executor
#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    /// Executions entered (including replays)
    executions_started: AtomicU64,

    /// Executions that wrote and published
    executions_succeeded: AtomicU64,

    /// Executions that ended in `Failed`
    executions_failed: AtomicU64,

    /// Executions cancelled before the record was written
    executions_cancelled: AtomicU64,

    /// Publishes parked for replay
    publishes_parked: AtomicU64,

    /// Step attempts beyond the first
    step_retries: AtomicU64,

    /// Parked publishes retried
    publish_replays: AtomicU64,

    /// Successful record writes
    records_written: AtomicU64,

    /// Successful publishes
    events_published: AtomicU64,
}

impl ExecutorMetrics {
    #[inline]
    pub const fn new() -> Self {
        Self {
            executions_started: AtomicU64::new(0),
            executions_succeeded: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
            executions_cancelled: AtomicU64::new(0),
            publishes_parked: AtomicU64::new(0),
            step_retries: AtomicU64::new(0),
            publish_replays: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_started(&self) {
        self.executions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how an execution ended
    #[inline]
    pub fn record_finished(&self, status: ExecutionStatus) {
        let counter = match status {
            ExecutionStatus::Succeeded => &self.executions_succeeded,
            ExecutionStatus::Failed => &self.executions_failed,
            ExecutionStatus::Cancelled => &self.executions_cancelled,
            ExecutionStatus::PendingPublish => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parked(&self) {
        self.publishes_parked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_step_retry(&self) {
        self.step_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_replay(&self) {
        self.publish_replays.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> ExecutorMetricsSnapshot {
        ExecutorMetricsSnapshot {
            executions_started: self.executions_started.load(Ordering::Relaxed),
            executions_succeeded: self.executions_succeeded.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            executions_cancelled: self.executions_cancelled.load(Ordering::Relaxed),
            publishes_parked: self.publishes_parked.load(Ordering::Relaxed),
            step_retries: self.step_retries.load(Ordering::Relaxed),
            publish_replays: self.publish_replays.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of executor metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorMetricsSnapshot {
    pub executions_started: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub executions_cancelled: u64,
    pub publishes_parked: u64,
    pub step_retries: u64,
    pub publish_replays: u64,
    pub records_written: u64,
    pub events_published: u64,
}
