//! Tally Pipeline
//!
//! The router that connects ingestion to both processing paths.
//!
//! # Architecture
//!
//! ```text
//!                                          ┌──→ ArchiverHandle::append   (OLAP, bounded, non-blocking)
//! [Ingest] ──→ mpsc::Receiver ──→ Transform┤
//!                                          └──→ tokio::spawn(execute)    (OLTP, write then publish)
//! ```
//!
//! # Key Design
//!
//! - **Transform once**: a malformed envelope is dropped before either path sees it
//! - **Independent deliveries**: archive backpressure never delays the workflow,
//!   a slow or failing workflow never delays archiving
//! - **Receipts**: `dispatch` returns the archive outcome and a join handle
//!   for the execution report
//! - **No silent loss**: `run` re-appends archive refusals with backoff and
//!   retains whatever the archiver never accepts
//! - **Drain on close**: `run` waits for in-flight executions before returning

mod error;
mod metrics;
mod router;

pub use error::{PipelineError, Result};
pub use metrics::{BackpressureTracker, RouterMetrics, RouterMetricsSnapshot};
pub use router::{
    DEFAULT_ARCHIVE_MAX_RETRIES, DEFAULT_ARCHIVE_RETRY_DELAY, Dispatch, Router, RouterHandle,
    Unarchived,
};

/// Default channel buffer size for ingestion input
pub const DEFAULT_INGEST_CHANNEL_SIZE: usize = 10_000;

#[cfg(test)]
mod router_test;
