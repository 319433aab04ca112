//! Workflow steps, retry policy and execution reports
//!
//! ```text
//! Start ──→ WriteRecord ──→ PublishProcessed ──→ Done
//!               │                  │
//!               └──────→ Failed ←──┘
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::WorkflowStepError;

/// Default attempts per step
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first step retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default number of reports kept in the audit window
pub const DEFAULT_AUDIT_WINDOW: usize = 1024;

/// Ceiling on the backoff multiplier (2^6 = 64x)
const MAX_BACKOFF_SHIFT: u32 = 6;

/// State of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Start,
    WriteRecord,
    PublishProcessed,
    Done,
    Failed,
}

impl Step {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::WriteRecord => "write_record",
            Self::PublishProcessed => "publish_processed",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Terminal states end the execution
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    /// Record written and processed event published
    Succeeded,
    /// A step exhausted its retries, see the report's error
    Failed,
    /// Cancelled before the record was written; no effect remains
    Cancelled,
    /// Cancelled after the record was written; publish parked for replay
    PendingPublish,
}

impl ExecutionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::PendingPublish => "pending_publish",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRetryPolicy {
    /// Attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_delay: Duration,
}

impl Default for StepRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl StepRetryPolicy {
    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * (1u32 << retry.min(MAX_BACKOFF_SHIFT))
    }

    /// Attempts actually made, never zero
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Result of one step within an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// One entry of the execution trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEntry {
    pub step: Step,
    /// Attempts made (0 for bookkeeping steps)
    pub attempts: u32,
    pub outcome: StepOutcome,
    pub duration: Duration,
}

/// Outcome of one execution, returned to the caller and kept for audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub transaction_id: String,
    pub status: ExecutionStatus,
    /// Last state reached
    pub final_step: Step,
    /// Step that failed, when status is `Failed`
    pub failed_step: Option<Step>,
    pub error: Option<WorkflowStepError>,
    pub trace: Vec<StepEntry>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionReport {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Steps in the order they ran
    pub fn steps(&self) -> Vec<Step> {
        self.trace.iter().map(|e| e.step).collect()
    }

    /// Trace entry for a step, if it ran
    pub fn entry(&self, step: Step) -> Option<&StepEntry> {
        self.trace.iter().find(|e| e.step == step)
    }
}
