//! One JSON document per record under a directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tally_protocol::TransactionEvent;
use tokio::fs;

use super::RecordStore;
use crate::error::RecordStoreError;

/// Stores each record as `{dir}/{key}.json`
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// sees either the old record or the new one, never a torn write.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `key`
    pub fn record_path(&self, key: &str) -> Result<PathBuf, RecordStoreError> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(RecordStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RecordStoreError {
    RecordStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, key: &str, record: &TransactionEvent) -> Result<(), RecordStoreError> {
        let path = self.record_path(key)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = self
            .dir
            .join(format!(".{key}.json.tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(&path, e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<TransactionEvent>, RecordStoreError> {
        let path = self.record_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
