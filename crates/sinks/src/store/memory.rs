//! In-process object store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{ObjectStore, validate_key};
use crate::StoreError;

/// Keeps objects in memory, keyed and ordered by object key
///
/// Useful for development runs and for asserting archiver output. Writes can
/// be made to fail on demand to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    name: String,
    objects: Mutex<BTreeMap<String, Bytes>>,
    fail_remaining: AtomicU32,
    put_attempts: AtomicU64,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fail the next `count` writes with `StoreError::Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Fetch an object
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }

    /// All object keys in order
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Keys under a prefix
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// True when nothing has been written
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Total `put` calls, including failed ones
    pub fn put_attempts(&self) -> u64 {
        self.put_attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        self.put_attempts.fetch_add(1, Ordering::Relaxed);
        validate_key(key)?;

        let should_fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Unavailable(format!("{} rejected write", self.name)));
        }

        self.objects.lock().insert(key.to_string(), body);
        Ok(())
    }
}
