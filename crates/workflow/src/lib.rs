//! Tally Workflow - Synchronous write-then-publish path
//!
//! Every canonical transaction runs through a small fixed state machine:
//!
//! ```text
//! Start ──→ WriteRecord ──→ PublishProcessed ──→ Done
//!   │            │                  │
//!   └────────────┴──────→ Failed ←──┘
//! ```
//!
//! - [`WorkflowExecutor`] - runs executions, retries steps, parks failed publishes
//! - [`RecordStore`] - key-value persistence ([`MemoryRecordStore`], [`FileRecordStore`])
//! - [`Publisher`] - downstream "transaction-processed" emission ([`BusPublisher`])
//!
//! Within one execution the record write strictly precedes the publish. A
//! publish is never attempted for a record that was not written.

mod error;
mod executor;
mod metrics;
mod publisher;
mod step;
mod store;

pub use error::{PublishError, RecordStoreError, Retryable, WorkflowError, WorkflowStepError};
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use metrics::{ExecutorMetrics, ExecutorMetricsSnapshot};
pub use publisher::{
    BusPublisher, BusTransport, ChannelTransport, DEFAULT_BUS_NAME, DEFAULT_SOURCE, LineTransport,
    Publisher, StdoutTransport,
};
pub use step::{
    DEFAULT_AUDIT_WINDOW, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, ExecutionReport,
    ExecutionStatus, Step, StepEntry, StepOutcome, StepRetryPolicy,
};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore};
