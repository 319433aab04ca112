//! Sink utilities
//!
//! - **arrow_rows**: typed column buffers assembled into Arrow record batches
//! - **compression**: Parquet codec selection
//! - **retry**: bounded exponential backoff for destination writes
//! - **lz4**: LZ4 frame encoding for JSON-lines objects

pub mod arrow_rows;
pub mod compression;
pub mod lz4;
pub mod retry;

pub use arrow_rows::{Cell, ColumnBuffers};
pub use compression::Compression;
pub use lz4::{decode_lz4_lines, encode_lz4_lines};
pub use retry::{RetryError, RetryPolicy, retry_with_backoff};
