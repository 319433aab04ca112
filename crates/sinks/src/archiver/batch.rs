//! Sealed batches and flush reports

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::partition::Partition;

/// What a sealed batch is written as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    /// Converted to Parquet for the primary destination; rejects go to error
    Primary,
    /// Raw JSON lines for the backup destination
    Backup,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Primary,
    Backup,
    Error,
}

impl Destination {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
            Self::Error => "error",
        }
    }
}

/// Error stream a record was diverted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorOutputType {
    /// Record failed schema conversion
    Conversion,
    /// Raw backup write for the batch exhausted its retries
    Backup,
}

impl ErrorOutputType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversion => "conversion",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for ErrorOutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch swapped out of the buffer, waiting to be written
///
/// The id and flush time are fixed at sealing, so writing the batch again
/// after a re-queue targets the same partition and object keys.
#[derive(Debug, Clone)]
pub(crate) struct SealedBatch {
    pub id: Uuid,
    pub seq: u64,
    pub kind: BatchKind,
    pub flushed_at: DateTime<Utc>,
    pub partition: Partition,
    pub records: Vec<Bytes>,
    /// Set once the batch has been re-queued
    pub requeued: bool,
}

impl SealedBatch {
    pub fn seal(seq: u64, kind: BatchKind, flushed_at: DateTime<Utc>, records: Vec<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            kind,
            flushed_at,
            partition: Partition::from_flush_time(flushed_at),
            records,
            requeued: false,
        }
    }
}

/// How a batch ended in one flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// All objects written
    Written,
    /// Destination write failed; the batch will be retried on the next flush
    Requeued { error: String },
    /// Failed again after its re-queue; kept in the failed list
    Failed { error: String },
}

/// Per-batch result of a flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub seq: u64,
    pub kind: BatchKind,
    pub partition: Partition,
    /// Records in the batch
    pub records: usize,
    /// Rows written to the primary destination
    pub converted: usize,
    /// Records written to the error destination
    pub rejected: usize,
    /// Backup write failed and the raw records went to the error stream
    pub diverted: bool,
    pub outcome: BatchOutcome,
    /// True when this was a second attempt for a re-queued batch
    pub retry: bool,
}

impl BatchReport {
    #[inline]
    pub fn is_written(&self) -> bool {
        self.outcome == BatchOutcome::Written
    }
}

/// Result of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub batches: Vec<BatchReport>,
}

impl FlushReport {
    /// Nothing was pending
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Every batch in the flush was written
    pub fn is_success(&self) -> bool {
        self.batches.iter().all(BatchReport::is_written)
    }

    /// Report for the primary batch sealed by this flush, if any
    pub fn primary(&self) -> Option<&BatchReport> {
        self.batches
            .iter()
            .find(|b| b.kind == BatchKind::Primary && !b.retry)
    }

    /// Report for the backup batch sealed by this flush, if any
    pub fn backup(&self) -> Option<&BatchReport> {
        self.batches
            .iter()
            .find(|b| b.kind == BatchKind::Backup && !b.retry)
    }

    /// Rows written to primary across all batches
    pub fn converted(&self) -> usize {
        self.batches.iter().map(|b| b.converted).sum()
    }

    /// Records written to the conversion error stream across all batches
    pub fn rejected(&self) -> usize {
        self.batches.iter().map(|b| b.rejected).sum()
    }

    pub(crate) fn push(&mut self, report: BatchReport) {
        self.batches.push(report);
    }
}

/// Batch that failed after its re-queue
///
/// Held for the operator; records are never discarded.
#[derive(Debug, Clone)]
pub struct FailedBatch {
    pub seq: u64,
    pub kind: BatchKind,
    pub partition: Partition,
    pub flushed_at: DateTime<Utc>,
    pub records: Vec<Bytes>,
    pub error: String,
}

impl From<(SealedBatch, String)> for FailedBatch {
    fn from((batch, error): (SealedBatch, String)) -> Self {
        Self {
            seq: batch.seq,
            kind: batch.kind,
            partition: batch.partition,
            flushed_at: batch.flushed_at,
            records: batch.records,
            error,
        }
    }
}
