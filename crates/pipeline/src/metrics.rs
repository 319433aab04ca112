//! Router delivery metrics
//!
//! Atomic counters for tracking router deliveries.
//! All operations use relaxed ordering; values are eventually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use tally_workflow::ExecutionStatus;

/// Delivery counters for the router
///
/// Safe to update from the dispatching task and from every spawned workflow
/// task concurrently.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Raw events handed to `dispatch`
    events_received: AtomicU64,

    /// Raw bytes handed to `dispatch`
    bytes_received: AtomicU64,

    /// Events dropped because the envelope could not be transformed
    transform_failures: AtomicU64,

    /// Events accepted by the archiver
    archive_ok: AtomicU64,

    /// Events the archiver refused (backpressure or closed)
    archive_failed: AtomicU64,

    /// Archiver refusals caused by a full queue
    backpressure_events: AtomicU64,

    /// Refused events accepted on a later re-append
    archive_retried: AtomicU64,

    /// Events the archiver never accepted, kept for the operator
    archive_retained: AtomicU64,

    /// Events received before they were requested
    time_anomalies: AtomicU64,

    /// Workflow executions spawned
    workflows_started: AtomicU64,

    /// Executions that wrote and published
    workflows_succeeded: AtomicU64,

    /// Executions that ended in `Failed`
    workflows_failed: AtomicU64,

    /// Executions cancelled, with or without a parked publish
    workflows_cancelled: AtomicU64,
}

impl RouterMetrics {
    /// Create new metrics instance with all counters at zero
    #[inline]
    pub const fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            transform_failures: AtomicU64::new(0),
            archive_ok: AtomicU64::new(0),
            archive_failed: AtomicU64::new(0),
            backpressure_events: AtomicU64::new(0),
            archive_retried: AtomicU64::new(0),
            archive_retained: AtomicU64::new(0),
            time_anomalies: AtomicU64::new(0),
            workflows_started: AtomicU64::new(0),
            workflows_succeeded: AtomicU64::new(0),
            workflows_failed: AtomicU64::new(0),
            workflows_cancelled: AtomicU64::new(0),
        }
    }

    /// Record a raw event entering the router
    #[inline]
    pub fn record_received(&self, byte_count: u64) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transform_failure(&self) {
        self.transform_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_archive_ok(&self) {
        self.archive_ok.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an archiver refusal
    #[inline]
    pub fn record_archive_failed(&self, backpressure: bool) {
        self.archive_failed.fetch_add(1, Ordering::Relaxed);
        if backpressure {
            self.backpressure_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a refused event accepted on re-append
    #[inline]
    pub fn record_archive_retried(&self) {
        self.archive_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event kept because the archiver never accepted it
    #[inline]
    pub fn record_archive_retained(&self) {
        self.archive_retained.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_time_anomaly(&self) {
        self.time_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_workflow_started(&self) {
        self.workflows_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a workflow execution ended
    #[inline]
    pub fn record_workflow_finished(&self, status: ExecutionStatus) {
        let counter = match status {
            ExecutionStatus::Succeeded => &self.workflows_succeeded,
            ExecutionStatus::Failed => &self.workflows_failed,
            ExecutionStatus::Cancelled | ExecutionStatus::PendingPublish => {
                &self.workflows_cancelled
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    #[inline]
    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            archive_ok: self.archive_ok.load(Ordering::Relaxed),
            archive_failed: self.archive_failed.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            archive_retried: self.archive_retried.load(Ordering::Relaxed),
            archive_retained: self.archive_retained.load(Ordering::Relaxed),
            time_anomalies: self.time_anomalies.load(Ordering::Relaxed),
            workflows_started: self.workflows_started.load(Ordering::Relaxed),
            workflows_succeeded: self.workflows_succeeded.load(Ordering::Relaxed),
            workflows_failed: self.workflows_failed.load(Ordering::Relaxed),
            workflows_cancelled: self.workflows_cancelled.load(Ordering::Relaxed),
        }
    }

    /// Get backpressure events count
    #[inline]
    pub fn backpressure_events(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// Point-in-time snapshot of router metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterMetricsSnapshot {
    pub events_received: u64,
    pub bytes_received: u64,
    pub transform_failures: u64,
    pub archive_ok: u64,
    pub archive_failed: u64,
    pub backpressure_events: u64,
    pub archive_retried: u64,
    pub archive_retained: u64,
    pub time_anomalies: u64,
    pub workflows_started: u64,
    pub workflows_succeeded: u64,
    pub workflows_failed: u64,
    pub workflows_cancelled: u64,
}

impl RouterMetricsSnapshot {
    /// Fraction of transformed events the archiver accepted (0.0 - 1.0)
    ///
    /// Returns None if nothing reached the archiver.
    #[inline]
    pub fn archive_success_rate(&self) -> Option<f64> {
        let total = self.archive_ok + self.archive_failed;
        if total == 0 {
            None
        } else {
            Some(self.archive_ok as f64 / total as f64)
        }
    }

    /// Executions spawned but not yet reported
    #[inline]
    pub fn workflows_in_flight(&self) -> u64 {
        self.workflows_started.saturating_sub(
            self.workflows_succeeded + self.workflows_failed + self.workflows_cancelled,
        )
    }
}

// ============================================================================
// Backpressure Tracker - Rate-limited logging for production visibility
// ============================================================================

/// Rate-limited archive backpressure logging
///
/// Aggregates refusals and logs a summary at most once per second instead of
/// once per event.
///
/// # Thresholds
///
/// - >0 refusals/sec: WARN level
/// - >100 refusals/sec: ERROR level (archiver cannot keep up)
pub struct BackpressureTracker {
    /// Refusals in current interval
    interval_refusals: AtomicU64,
    /// Bytes refused in current interval
    interval_bytes: AtomicU64,
    /// Last log time (epoch milliseconds)
    last_log_ms: AtomicU64,
}

/// Log interval in milliseconds
const LOG_INTERVAL_MS: u64 = 1000;
/// Refusals per interval that trigger ERROR level
const CRITICAL_REFUSAL_THRESHOLD: u64 = 100;

impl BackpressureTracker {
    pub fn new() -> Self {
        Self {
            interval_refusals: AtomicU64::new(0),
            interval_bytes: AtomicU64::new(0),
            last_log_ms: AtomicU64::new(Self::now_ms()),
        }
    }

    /// Record a refused event; returns true if a summary was logged
    pub fn record_refusal(&self, byte_count: u64) -> bool {
        self.interval_refusals.fetch_add(1, Ordering::Relaxed);
        self.interval_bytes.fetch_add(byte_count, Ordering::Relaxed);

        self.maybe_log()
    }

    fn maybe_log(&self) -> bool {
        let now = Self::now_ms();
        let last = self.last_log_ms.load(Ordering::Relaxed);

        if now.saturating_sub(last) < LOG_INTERVAL_MS {
            return false;
        }

        // Claim the log slot so concurrent callers don't log twice
        if self
            .last_log_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let refusals = self.interval_refusals.swap(0, Ordering::Relaxed);
        let bytes = self.interval_bytes.swap(0, Ordering::Relaxed);

        if refusals == 0 {
            return false;
        }

        if refusals > CRITICAL_REFUSAL_THRESHOLD {
            tracing::error!(
                refused_events = refusals,
                refused_bytes = bytes,
                threshold = CRITICAL_REFUSAL_THRESHOLD,
                "CRITICAL: high archive backpressure - archiver cannot keep up"
            );
        } else {
            tracing::warn!(
                refused_events = refusals,
                refused_bytes = bytes,
                "archive backpressure: events refused in last second"
            );
        }

        true
    }

    #[inline]
    fn now_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn current_refusals(&self) -> u64 {
        self.interval_refusals.load(Ordering::Relaxed)
    }
}

impl Default for BackpressureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackpressureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureTracker")
            .field(
                "interval_refusals",
                &self.interval_refusals.load(Ordering::Relaxed),
            )
            .field("interval_bytes", &self.interval_bytes.load(Ordering::Relaxed))
            .finish()
    }
}
