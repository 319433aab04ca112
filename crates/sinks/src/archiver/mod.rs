//! Batch archiver
//!
//! Buffers canonical transaction records and periodically writes them as
//! partitioned objects to three destinations:
//!
//! - **backup**: every record as received, JSON lines, LZ4 framed
//! - **primary**: records converted against the table schema, Parquet
//! - **error**: records that failed conversion (or a backup write that could
//!   not be completed), tagged JSON lines, LZ4 framed
//!
//! # Buffering
//!
//! Appends push into a pending batch guarded by a single mutex. A flush swaps
//! the batch out with `std::mem::take`, so appends never see a half-flushed
//! batch and a record can never land in two batches. The backup copy has its
//! own buffer with a smaller threshold and is also drained on every flush.
//!
//! # Failure handling
//!
//! Each destination write is retried with bounded exponential backoff. A batch
//! that still fails is re-queued once and written again at the next flush,
//! keeping its original partition and object keys. A second failure is fatal:
//! the batch is logged at `error` and kept for the operator
//! (`take_failed_batches`). Nothing is dropped.

mod batch;
mod convert;
mod metrics;
mod partition;
mod writer;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tally_protocol::TransactionEvent;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, DEFAULT_TABLE_NAME, TableSchema};
use crate::error::ArchiveError;
use crate::store::ObjectStore;
use crate::util::{Compression, RetryPolicy};

use batch::{Destination, SealedBatch};
use partition::object_name;
use writer::{JSONL_LZ4_EXT, PARQUET_EXT};

pub use batch::{BatchKind, BatchOutcome, BatchReport, ErrorOutputType, FailedBatch, FlushReport};
pub use metrics::{ArchiverMetrics, ArchiverMetricsSnapshot};
pub use partition::Partition;

/// Default time between flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Default buffered payload size that triggers a flush (64 MiB)
pub const DEFAULT_FLUSH_SIZE_BYTES: usize = 64 * 1024 * 1024;

/// Default buffered backup size that triggers a backup-only flush (5 MiB)
pub const DEFAULT_BACKUP_FLUSH_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Shortest flush interval the loop will tick at
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Default number of records the pending batch may hold
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

// =============================================================================
// Configuration
// =============================================================================

/// Archiver configuration
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Catalog table records are converted against
    pub table: String,

    /// Time-based flush trigger
    pub flush_interval: Duration,

    /// Size-based flush trigger (buffered payload bytes)
    pub flush_size_bytes: usize,

    /// Size trigger for the backup stream alone
    pub backup_flush_size_bytes: usize,

    /// Pending records accepted before appends fail with backpressure
    pub queue_capacity: usize,

    /// Parquet compression codec
    pub compression: Compression,

    /// Destination write retry policy
    pub retry: RetryPolicy,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE_NAME.to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_size_bytes: DEFAULT_FLUSH_SIZE_BYTES,
            backup_flush_size_bytes: DEFAULT_BACKUP_FLUSH_SIZE_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            compression: Compression::Snappy,
            retry: RetryPolicy::default(),
        }
    }
}

impl ArchiverConfig {
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_flush_size_bytes(mut self, bytes: usize) -> Self {
        self.flush_size_bytes = bytes;
        self
    }

    pub fn with_backup_flush_size_bytes(mut self, bytes: usize) -> Self {
        self.backup_flush_size_bytes = bytes;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// The three output stores
#[derive(Clone)]
pub struct Destinations {
    pub primary: Arc<dyn ObjectStore>,
    pub backup: Arc<dyn ObjectStore>,
    pub error: Arc<dyn ObjectStore>,
}

impl Destinations {
    pub fn new(
        primary: Arc<dyn ObjectStore>,
        backup: Arc<dyn ObjectStore>,
        error: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            primary,
            backup,
            error,
        }
    }

    fn store(&self, destination: Destination) -> &dyn ObjectStore {
        match destination {
            Destination::Primary => self.primary.as_ref(),
            Destination::Backup => self.backup.as_ref(),
            Destination::Error => self.error.as_ref(),
        }
    }
}

impl fmt::Debug for Destinations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destinations")
            .field("primary", &self.primary.name())
            .field("backup", &self.backup.name())
            .field("error", &self.error.name())
            .finish()
    }
}

// =============================================================================
// Shared state
// =============================================================================

/// Pending records, swapped out whole on flush
#[derive(Debug, Default)]
struct Buffers {
    batch: Vec<Bytes>,
    batch_bytes: usize,
    backup: Vec<Bytes>,
    backup_bytes: usize,
    /// Set under this lock so no append can slip in after the final swap
    closed: bool,
}

struct Shared {
    config: ArchiverConfig,
    table: TableSchema,
    destinations: Destinations,
    buffers: Mutex<Buffers>,
    next_seq: AtomicU64,
    requeued: Mutex<Vec<SealedBatch>>,
    failed: Mutex<Vec<FailedBatch>>,
    /// Serializes flushes so sequence numbers and re-queues stay ordered
    flush_lock: tokio::sync::Mutex<()>,
    flush_notify: Notify,
    backup_notify: Notify,
    closed: AtomicBool,
    metrics: ArchiverMetrics,
}

/// Rows written by one batch
#[derive(Debug, Default, Clone, Copy)]
struct WriteCounts {
    converted: usize,
    rejected: usize,
    diverted: bool,
}

// =============================================================================
// Archiver
// =============================================================================

/// Batch archiver
///
/// Owns the flush loop. Producers append through [`ArchiverHandle`]s, which
/// remain usable (for metrics and failed batches) after `run()` returns.
pub struct Archiver {
    handle: ArchiverHandle,
}

impl Archiver {
    /// Create an archiver for the configured table, resolved from `catalog`
    pub fn new(
        config: ArchiverConfig,
        destinations: Destinations,
        catalog: &dyn Catalog,
    ) -> Result<Self, ArchiveError> {
        let table = catalog
            .table(&config.table)
            .ok_or_else(|| ArchiveError::UnknownTable(config.table.clone()))?;
        Ok(Self::with_schema(config, destinations, table))
    }

    /// Create an archiver with an explicit table schema
    pub fn with_schema(config: ArchiverConfig, destinations: Destinations, table: TableSchema) -> Self {
        let shared = Shared {
            config,
            table,
            destinations,
            buffers: Mutex::new(Buffers::default()),
            next_seq: AtomicU64::new(0),
            requeued: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_notify: Notify::new(),
            backup_notify: Notify::new(),
            closed: AtomicBool::new(false),
            metrics: ArchiverMetrics::new(),
        };
        Self {
            handle: ArchiverHandle {
                shared: Arc::new(shared),
            },
        }
    }

    /// Cloneable producer handle
    pub fn handle(&self) -> ArchiverHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.handle.shared.config
    }

    /// Run the flush loop until `cancel` fires
    ///
    /// Flushes on the interval, when the buffered payload reaches
    /// `flush_size_bytes` or the batch reaches `queue_capacity`, and drains
    /// the backup stream alone when it reaches `backup_flush_size_bytes`. On
    /// cancellation the archiver closes, performs a final flush and returns
    /// its metrics.
    pub async fn run(self, cancel: CancellationToken) -> ArchiverMetricsSnapshot {
        let shared = Arc::clone(&self.handle.shared);
        let config = &shared.config;
        info!(
            table = %config.table,
            flush_interval = ?config.flush_interval,
            flush_size_bytes = config.flush_size_bytes,
            backup_flush_size_bytes = config.backup_flush_size_bytes,
            queue_capacity = config.queue_capacity,
            compression = %config.compression,
            primary = shared.destinations.primary.name(),
            backup = shared.destinations.backup.name(),
            error = shared.destinations.error.name(),
            "archiver starting"
        );

        let mut ticker = tokio::time::interval(config.flush_interval.max(MIN_FLUSH_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.handle.flush().await;
                }
                _ = shared.flush_notify.notified() => {
                    self.handle.flush().await;
                    ticker.reset();
                }
                _ = shared.backup_notify.notified() => {
                    self.handle.flush_backup().await;
                }
            }
        }

        self.handle.shutdown().await
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Producer side of the archiver
#[derive(Clone)]
pub struct ArchiverHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for ArchiverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiverHandle")
            .field("table", &self.shared.table.name)
            .field("pending", &self.pending_records())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ArchiverHandle {
    /// Serialize a transaction event and add it to the pending batch
    ///
    /// Never blocks. Fails with `Backpressure` when the pending batch is at
    /// capacity; the event stays the caller's responsibility.
    pub fn append(&self, event: &TransactionEvent) -> Result<(), ArchiveError> {
        event.validate()?;
        let record = event.to_json_bytes()?;
        self.append_record(record)
    }

    /// Add an already-serialized JSON record to the pending batch
    ///
    /// The record is not validated here; records that do not fit the table
    /// schema are diverted to the error stream at flush time.
    pub fn append_record(&self, record: impl Into<Bytes>) -> Result<(), ArchiveError> {
        let record = record.into();
        let shared = &self.shared;
        let capacity = shared.config.queue_capacity;

        let (flush_due, backup_due) = {
            let mut buffers = shared.buffers.lock();
            if buffers.closed {
                drop(buffers);
                shared.metrics.record_rejected();
                return Err(ArchiveError::Closed);
            }
            if buffers.batch.len() >= capacity {
                drop(buffers);
                shared.metrics.record_rejected();
                shared.flush_notify.notify_one();
                return Err(ArchiveError::Backpressure { capacity });
            }

            let len = record.len();
            buffers.batch_bytes += len;
            buffers.backup_bytes += len;
            buffers.backup.push(record.clone());
            buffers.batch.push(record);
            (
                buffers.batch_bytes >= shared.config.flush_size_bytes
                    || buffers.batch.len() >= capacity,
                buffers.backup_bytes >= shared.config.backup_flush_size_bytes,
            )
        };

        shared.metrics.record_appended();
        // a main flush drains the backup buffer too
        if flush_due {
            shared.flush_notify.notify_one();
        } else if backup_due {
            shared.backup_notify.notify_one();
        }
        Ok(())
    }

    /// Flush everything pending now
    pub async fn flush(&self) -> FlushReport {
        self.flush_at(Utc::now()).await
    }

    /// Flush everything pending, partitioned by `now`
    ///
    /// Re-queued batches from the previous flush are written first, then the
    /// backup buffer, then the pending batch.
    pub async fn flush_at(&self, now: DateTime<Utc>) -> FlushReport {
        let shared = &self.shared;
        let _guard = shared.flush_lock.lock().await;
        let mut report = FlushReport::default();

        let requeued = std::mem::take(&mut *shared.requeued.lock());
        for batch in requeued {
            report.push(self.write_batch(batch).await);
        }

        let (backup, primary) = {
            let mut buffers = shared.buffers.lock();
            buffers.batch_bytes = 0;
            buffers.backup_bytes = 0;
            (
                std::mem::take(&mut buffers.backup),
                std::mem::take(&mut buffers.batch),
            )
        };

        if !backup.is_empty() {
            let batch = self.seal(BatchKind::Backup, now, backup);
            report.push(self.write_batch(batch).await);
        }
        if !primary.is_empty() {
            let batch = self.seal(BatchKind::Primary, now, primary);
            report.push(self.write_batch(batch).await);
        }

        if !report.is_empty() {
            debug!(
                batches = report.batches.len(),
                converted = report.converted(),
                rejected = report.rejected(),
                success = report.is_success(),
                "flush complete"
            );
        }
        report
    }

    /// Flush only the backup buffer now
    pub async fn flush_backup(&self) -> FlushReport {
        self.flush_backup_at(Utc::now()).await
    }

    /// Flush only the backup buffer, partitioned by `now`
    pub async fn flush_backup_at(&self, now: DateTime<Utc>) -> FlushReport {
        let shared = &self.shared;
        let _guard = shared.flush_lock.lock().await;
        let mut report = FlushReport::default();

        let backup = {
            let mut buffers = shared.buffers.lock();
            buffers.backup_bytes = 0;
            std::mem::take(&mut buffers.backup)
        };
        if !backup.is_empty() {
            let batch = self.seal(BatchKind::Backup, now, backup);
            report.push(self.write_batch(batch).await);
        }
        report
    }

    /// Stop accepting records and flush what is left
    ///
    /// A batch that fails the final flush gets its one re-queue attempt
    /// immediately, so nothing is left waiting for a flush that never comes.
    pub async fn shutdown(&self) -> ArchiverMetricsSnapshot {
        self.close();
        self.flush().await;
        if !self.shared.requeued.lock().is_empty() {
            self.flush().await;
        }

        let snapshot = self.shared.metrics.snapshot();
        info!(
            appended = snapshot.records_appended,
            rejected = snapshot.records_rejected,
            batches = snapshot.batches_flushed,
            rows = snapshot.rows_converted,
            conversion_errors = snapshot.conversion_errors,
            bytes = snapshot.bytes_written(),
            retries = snapshot.write_retries,
            requeued = snapshot.batches_requeued,
            fatal = snapshot.fatal_failures,
            "archiver shutting down"
        );
        snapshot
    }

    /// Refuse further appends
    pub fn close(&self) {
        let mut buffers = self.shared.buffers.lock();
        buffers.closed = true;
        self.shared.closed.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Records waiting in the pending batch
    pub fn pending_records(&self) -> usize {
        self.shared.buffers.lock().batch.len()
    }

    /// Batches waiting for their re-queue attempt
    pub fn requeued_batches(&self) -> usize {
        self.shared.requeued.lock().len()
    }

    /// Remove and return batches that failed after their re-queue
    pub fn take_failed_batches(&self) -> Vec<FailedBatch> {
        std::mem::take(&mut *self.shared.failed.lock())
    }

    pub fn metrics(&self) -> &ArchiverMetrics {
        &self.shared.metrics
    }

    pub fn table(&self) -> &TableSchema {
        &self.shared.table
    }

    fn seal(&self, kind: BatchKind, now: DateTime<Utc>, records: Vec<Bytes>) -> SealedBatch {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        SealedBatch::seal(seq, kind, now, records)
    }

    /// Write one batch and decide its fate
    async fn write_batch(&self, mut batch: SealedBatch) -> BatchReport {
        let shared = &self.shared;
        let result = match batch.kind {
            BatchKind::Primary => self.write_primary(&batch).await,
            BatchKind::Backup => self.write_backup(&batch).await,
        };

        let mut report = BatchReport {
            seq: batch.seq,
            kind: batch.kind,
            partition: batch.partition,
            records: batch.records.len(),
            converted: 0,
            rejected: 0,
            diverted: false,
            outcome: BatchOutcome::Written,
            retry: batch.requeued,
        };

        match result {
            Ok(counts) => {
                shared.metrics.record_batch_flushed();
                shared
                    .metrics
                    .record_converted(counts.converted as u64, counts.rejected as u64);
                report.converted = counts.converted;
                report.rejected = counts.rejected;
                report.diverted = counts.diverted;
                debug!(
                    seq = batch.seq,
                    kind = %batch.kind,
                    partition = %batch.partition,
                    records = report.records,
                    converted = counts.converted,
                    rejected = counts.rejected,
                    "batch written"
                );
            }
            Err(e) if !batch.requeued => {
                let message = e.to_string();
                warn!(
                    seq = batch.seq,
                    kind = %batch.kind,
                    partition = %batch.partition,
                    records = report.records,
                    error = %message,
                    "batch write failed, re-queued for next flush"
                );
                shared.metrics.record_requeue();
                batch.requeued = true;
                shared.requeued.lock().push(batch);
                report.outcome = BatchOutcome::Requeued { error: message };
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    seq = batch.seq,
                    kind = %batch.kind,
                    partition = %batch.partition,
                    records = report.records,
                    error = %message,
                    "batch failed after re-queue, kept for operator"
                );
                shared.metrics.record_fatal();
                shared.failed.lock().push(FailedBatch::from((batch, message.clone())));
                report.outcome = BatchOutcome::Failed { error: message };
            }
        }
        report
    }

    /// Convert, then write Parquet to primary and rejects to error
    async fn write_primary(&self, batch: &SealedBatch) -> Result<WriteCounts, ArchiveError> {
        let shared = &self.shared;
        let table = shared.table.name.as_str();
        let converted = convert::convert_records(&shared.table, &batch.records)?;
        let rows = converted.batch.num_rows();

        if rows > 0 {
            let body = writer::encode_parquet(&converted.batch, shared.config.compression)?;
            let key = format!(
                "{}{}",
                batch.partition.data_prefix(table),
                object_name(table, batch.seq, batch.flushed_at, batch.id, PARQUET_EXT)
            );
            self.put(Destination::Primary, &key, body).await?;
        }

        let rejected = converted.rejected.len();
        if rejected > 0 {
            for r in &converted.rejected {
                debug!(seq = batch.seq, error = %r.error, "record failed conversion");
            }
            warn!(
                seq = batch.seq,
                rejected,
                converted = rows,
                "records diverted to conversion error stream"
            );

            let messages: Vec<String> = converted
                .rejected
                .iter()
                .map(|r| r.error.to_string())
                .collect();
            let body = writer::encode_error_lines(
                table,
                ErrorOutputType::Conversion,
                converted
                    .rejected
                    .iter()
                    .zip(&messages)
                    .map(|(r, m)| (&r.raw[..], m.as_str())),
            )?;
            let key = self.error_key(batch, ErrorOutputType::Conversion);
            self.put(Destination::Error, &key, body).await?;
        }

        Ok(WriteCounts {
            converted: rows,
            rejected,
            diverted: false,
        })
    }

    /// Write raw lines to backup, diverting to the error stream on failure
    async fn write_backup(&self, batch: &SealedBatch) -> Result<WriteCounts, ArchiveError> {
        let shared = &self.shared;
        let table = shared.table.name.as_str();
        let body = writer::encode_raw_lines(&batch.records)?;
        let key = format!(
            "{}{}",
            batch.partition.data_prefix(table),
            object_name(table, batch.seq, batch.flushed_at, batch.id, JSONL_LZ4_EXT)
        );

        let Err(e) = self.put(Destination::Backup, &key, body).await else {
            return Ok(WriteCounts::default());
        };

        warn!(
            seq = batch.seq,
            records = batch.records.len(),
            error = %e,
            "backup write failed, diverting raw records to error stream"
        );
        let message = e.to_string();
        let body = writer::encode_error_lines(
            table,
            ErrorOutputType::Backup,
            batch.records.iter().map(|r| (&r[..], message.as_str())),
        )?;
        let key = self.error_key(batch, ErrorOutputType::Backup);
        self.put(Destination::Error, &key, body).await?;
        shared.metrics.record_backup_diversion();

        Ok(WriteCounts {
            diverted: true,
            ..WriteCounts::default()
        })
    }

    fn error_key(&self, batch: &SealedBatch, error_type: ErrorOutputType) -> String {
        let table = self.shared.table.name.as_str();
        format!(
            "{}{}",
            batch.partition.error_prefix(table, error_type.as_str()),
            object_name(table, batch.seq, batch.flushed_at, batch.id, JSONL_LZ4_EXT)
        )
    }

    async fn put(
        &self,
        destination: Destination,
        key: &str,
        body: Bytes,
    ) -> Result<u64, crate::error::DestinationWriteError> {
        let shared = &self.shared;
        writer::put_with_retry(
            shared.destinations.store(destination),
            destination,
            key,
            body,
            &shared.config.retry,
            &shared.metrics,
        )
        .await
    }
}

#[cfg(test)]
#[path = "archiver_test.rs"]
mod archiver_test;
