//! Filesystem-backed object store

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, validate_key};
use crate::StoreError;

/// Writes objects as files under a root directory
///
/// Each object is written to a temporary sibling and renamed into place, so
/// readers never see a half-written file and rewrites replace atomically.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    name: String,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = format!("file://{}", root.display());
        Self { root, name }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path an object key maps to
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        validate_key(key)?;

        let path = self.path_for(key);
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &body).await.map_err(io_err)?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }

        tracing::trace!(path = %path.display(), bytes = body.len(), "object written");
        Ok(())
    }
}
