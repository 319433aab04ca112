//! Pipeline error types

use thiserror::Error;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Workflow task panicked or was aborted before reporting
    #[error("workflow task failed: {0}")]
    WorkflowTask(#[from] tokio::task::JoinError),

    /// Router input channel closed before the event could be queued
    #[error("router is shutting down")]
    ShuttingDown,
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
