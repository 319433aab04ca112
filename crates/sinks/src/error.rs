//! Archiver error types

use thiserror::Error;

use tally_protocol::ProtocolError;

/// Errors returned by object storage destinations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem or transport failure
    #[error("I/O error writing '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Key would escape the destination root
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Destination refused the write
    #[error("destination unavailable: {0}")]
    Unavailable(String),
}

/// A destination write that exhausted its retries
#[derive(Debug, Error)]
#[error("write to {destination} failed after {attempts} attempts ({key}): {source}")]
pub struct DestinationWriteError {
    /// Logical destination (primary, backup, error)
    pub destination: &'static str,
    /// Object key that could not be written
    pub key: String,
    /// Total attempts made
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}

/// Per-record schema conversion failure
///
/// Isolated to the error destination; never fails the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Record is not a JSON object
    #[error("record is not a JSON object: {0}")]
    Malformed(String),

    /// Column absent, null, or empty
    #[error("missing value for column '{column}'")]
    MissingColumn { column: String },

    /// Value cannot be read as the column type
    #[error("column '{column}' expects {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },

    /// Decimal below zero
    #[error("column '{column}' must be non-negative, found {value}")]
    Negative { column: String, value: String },

    /// Decimal does not fit the column without losing digits
    #[error("column '{column}' value {value} does not fit decimal({precision},{scale})")]
    OutOfRange {
        column: String,
        value: String,
        precision: u8,
        scale: i8,
    },
}

/// Archiver errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Pending batch is at capacity; retry with backoff
    #[error("archive queue full: {capacity} records pending")]
    Backpressure { capacity: usize },

    /// Archiver has shut down and accepts no more records
    #[error("archiver is shut down")]
    Closed,

    /// Event violates the canonical invariants
    #[error("event rejected: {0}")]
    InvalidEvent(#[from] ProtocolError),

    /// Destination write exhausted its retries
    #[error(transparent)]
    DestinationWrite(#[from] DestinationWriteError),

    /// Columnar or compressed encoding failed
    #[error("encode error: {0}")]
    Encode(String),

    /// Configured table is not in the catalog
    #[error("table '{0}' not found in catalog")]
    UnknownTable(String),
}

impl ArchiveError {
    /// True when the caller should retry later
    #[inline]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

impl From<parquet::errors::ParquetError> for ArchiveError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for ArchiveError {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        Self::Encode(e.to_string())
    }
}
