//! Tally - Sinks
//!
//! The OLAP path: a batch archiver that buffers canonical transaction records
//! and flushes them as partitioned, columnar objects to durable storage.
//!
//! # Architecture
//!
//! ```text
//!                  append()                       flush (interval | size)
//! [Router] ──→ ArchiverHandle ──→ Mutex<Buffers> ──swap──→ SealedBatch
//!                  │ (bounded)                               │
//!                  └─ Backpressure                           ├──→ backup  (raw JSONL, LZ4)
//!                                                            ├──→ primary (Parquet)
//!                                                            └──→ error   (tagged JSONL, LZ4)
//! ```
//!
//! # Object Layout
//!
//! ```text
//! primary: {table}/year=YYYY/month=MM/day=DD/hour=HH/{table}-{seq}-{ts}-{uuid}.parquet
//! backup:  {table}/year=YYYY/month=MM/day=DD/hour=HH/{table}-{seq}-{ts}-{uuid}.jsonl.lz4
//! error:   {table}error/{error-type}/year=YYYY/month=MM/day=DD/hour=HH/...jsonl.lz4
//! ```
//!
//! Partitions are derived from the flush time in UTC, never from event time.

/// Batch archiver (buffering, flush, retry, partitioning)
pub mod archiver;

/// Table schemas consulted for record conversion
pub mod catalog;

/// Durable object storage destinations
pub mod store;

/// Shared helpers (retry with backoff, Arrow row building)
pub mod util;

mod error;

pub use archiver::{
    Archiver, ArchiverConfig, ArchiverHandle, ArchiverMetrics, ArchiverMetricsSnapshot,
    BatchKind, BatchOutcome, BatchReport, Destinations, ErrorOutputType, FailedBatch,
    FlushReport, Partition,
};
pub use catalog::{Catalog, Column, ColumnType, StaticCatalog, TableSchema};
pub use error::{ArchiveError, ConversionError, DestinationWriteError, StoreError};
pub use store::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use util::{Compression, RetryPolicy};
