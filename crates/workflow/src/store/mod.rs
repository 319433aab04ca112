//! Key-value record store
//!
//! The `WriteRecord` step persists each canonical transaction under its
//! transaction id. Writes are idempotent overwrites: storing the same event
//! twice leaves exactly one record equal to it.

mod file;
mod memory;

use async_trait::async_trait;
use tally_protocol::TransactionEvent;

use crate::error::RecordStoreError;

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

/// Transaction record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Write `record` under `key`, replacing any existing record
    async fn put(&self, key: &str, record: &TransactionEvent) -> Result<(), RecordStoreError>;

    /// Read the record stored under `key`
    async fn get(&self, key: &str) -> Result<Option<TransactionEvent>, RecordStoreError>;
}
