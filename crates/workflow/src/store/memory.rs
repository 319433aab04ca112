//! In-process record store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tally_protocol::TransactionEvent;

use super::RecordStore;
use crate::error::RecordStoreError;

/// Keeps records in a map
///
/// Writes can be made to fail on demand to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, TransactionEvent>>,
    fail_remaining: AtomicU32,
    put_attempts: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes with `RecordStoreError::Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Total `put` calls, including failed ones
    pub fn put_attempts(&self) -> u64 {
        self.put_attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, record: &TransactionEvent) -> Result<(), RecordStoreError> {
        self.put_attempts.fetch_add(1, Ordering::Relaxed);
        if key.is_empty() {
            return Err(RecordStoreError::InvalidKey(key.to_string()));
        }

        let should_fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RecordStoreError::Unavailable("memory store rejected write".into()));
        }

        self.records.lock().insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<TransactionEvent>, RecordStoreError> {
        Ok(self.records.lock().get(key).cloned())
    }
}
