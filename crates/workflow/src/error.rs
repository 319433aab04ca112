//! Workflow error types

use std::path::PathBuf;

use thiserror::Error;

use tally_protocol::ProtocolError;

/// Errors returned by a record store
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// Filesystem failure
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key cannot be mapped to a storage location
    #[error("invalid record key: {0}")]
    InvalidKey(String),

    /// Store refused the operation
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned when publishing a processed event
#[derive(Debug, Error)]
pub enum PublishError {
    /// Envelope could not be encoded
    #[error("event encoding failed: {0}")]
    Encode(#[from] ProtocolError),

    /// Bus side of the transport has gone away
    #[error("bus transport closed")]
    Closed,

    /// Transport refused or failed the send
    #[error("bus transport error: {0}")]
    Transport(String),
}

/// Whether repeating the same call can succeed
///
/// Step errors that cannot change on retry fail the step at once instead of
/// spending the retry budget.
pub trait Retryable: std::fmt::Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RecordStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Unavailable(_) => true,
            Self::Serialization(_) | Self::InvalidKey(_) => false,
        }
    }
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            // a closed transport stays closed for the life of the process
            Self::Encode(_) | Self::Closed => false,
        }
    }
}

/// Why an execution ended in `Failed`
///
/// Carries the last underlying error as text so reports can be cloned into
/// the audit window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowStepError {
    /// Event violated the canonical invariants; nothing was written
    #[error("event rejected: {reason}")]
    InvalidEvent { reason: String },

    /// Record could not be persisted; publish was not attempted
    #[error("write record failed after {attempts} attempts: {reason}")]
    WriteRecordFailed { attempts: u32, reason: String },

    /// Record is persisted but the processed event was not published
    #[error("publish failed after {attempts} attempts: {reason}")]
    PublishFailed { attempts: u32, reason: String },
}

/// Executor operation errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No parked publish exists for the transaction
    #[error("no pending publish for transaction '{0}'")]
    NotPending(String),
}
