//! Archiver metrics

use std::sync::atomic::{AtomicU64, Ordering};

use super::batch::Destination;

/// Archiver counters
///
/// Shared between the archiver task and every handle; all updates are
/// relaxed atomic increments.
#[derive(Debug, Default)]
pub struct ArchiverMetrics {
    /// Records accepted into the pending batch
    pub records_appended: AtomicU64,
    /// Records refused (backpressure or closed)
    pub records_rejected: AtomicU64,
    /// Batches written successfully
    pub batches_flushed: AtomicU64,
    /// Rows written to the primary destination
    pub rows_converted: AtomicU64,
    /// Records diverted to the conversion error stream
    pub conversion_errors: AtomicU64,
    /// Bytes written to the primary destination
    pub primary_bytes: AtomicU64,
    /// Bytes written to the backup destination
    pub backup_bytes: AtomicU64,
    /// Bytes written to the error destination
    pub error_bytes: AtomicU64,
    /// Destination write retries (attempts beyond the first)
    pub write_retries: AtomicU64,
    /// Batches re-queued after exhausting retries
    pub batches_requeued: AtomicU64,
    /// Batches that failed after their re-queue
    pub fatal_failures: AtomicU64,
    /// Backup batches diverted to the error destination
    pub backup_diversions: AtomicU64,
}

impl ArchiverMetrics {
    pub const fn new() -> Self {
        Self {
            records_appended: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            rows_converted: AtomicU64::new(0),
            conversion_errors: AtomicU64::new(0),
            primary_bytes: AtomicU64::new(0),
            backup_bytes: AtomicU64::new(0),
            error_bytes: AtomicU64::new(0),
            write_retries: AtomicU64::new(0),
            batches_requeued: AtomicU64::new(0),
            fatal_failures: AtomicU64::new(0),
            backup_diversions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_converted(&self, rows: u64, rejected: u64) {
        self.rows_converted.fetch_add(rows, Ordering::Relaxed);
        self.conversion_errors.fetch_add(rejected, Ordering::Relaxed);
    }

    /// Record bytes written to a logical destination
    #[inline]
    pub(crate) fn record_bytes(&self, destination: Destination, bytes: u64) {
        let counter = match destination {
            Destination::Primary => &self.primary_bytes,
            Destination::Backup => &self.backup_bytes,
            Destination::Error => &self.error_bytes,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retries(&self, retries: u64) {
        if retries > 0 {
            self.write_retries.fetch_add(retries, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_requeue(&self) {
        self.batches_requeued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fatal(&self) {
        self.fatal_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_backup_diversion(&self) {
        self.backup_diversions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> ArchiverMetricsSnapshot {
        ArchiverMetricsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            rows_converted: self.rows_converted.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
            primary_bytes: self.primary_bytes.load(Ordering::Relaxed),
            backup_bytes: self.backup_bytes.load(Ordering::Relaxed),
            error_bytes: self.error_bytes.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            batches_requeued: self.batches_requeued.load(Ordering::Relaxed),
            fatal_failures: self.fatal_failures.load(Ordering::Relaxed),
            backup_diversions: self.backup_diversions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of archiver metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiverMetricsSnapshot {
    pub records_appended: u64,
    pub records_rejected: u64,
    pub batches_flushed: u64,
    pub rows_converted: u64,
    pub conversion_errors: u64,
    pub primary_bytes: u64,
    pub backup_bytes: u64,
    pub error_bytes: u64,
    pub write_retries: u64,
    pub batches_requeued: u64,
    pub fatal_failures: u64,
    pub backup_diversions: u64,
}

impl ArchiverMetricsSnapshot {
    /// Total bytes written across all destinations
    pub fn bytes_written(&self) -> u64 {
        self.primary_bytes + self.backup_bytes + self.error_bytes
    }
}
