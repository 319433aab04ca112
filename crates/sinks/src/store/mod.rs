//! Durable object storage destinations
//!
//! The archiver writes whole objects (one per batch per destination) and never
//! reads them back, so the contract is a single idempotent `put`.

mod local;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::StoreError;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

/// Object storage destination
///
/// Writing the same key twice must replace the earlier object; the archiver
/// relies on that when a re-queued batch is written again.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Write an object, replacing any existing object under `key`
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError>;
}

/// Reject keys that are empty, absolute, or climb out of the root
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part == ".." || part == ".")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
