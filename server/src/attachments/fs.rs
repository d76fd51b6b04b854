//! Filesystem-backed object store, served under a public URL prefix.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::{ObjectStore, StorageError, StorageResult, StoredObject};
use crate::store::BoxFuture;

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Keys are flat file names; anything that could escape the root is refused.
    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn not_found(key: &str, err: std::io::Error) -> StorageError {
        if err.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn put<'a>(&'a self, source: &'a Path, key: &'a str) -> BoxFuture<'a, StorageResult<StoredObject>> {
        Box::pin(async move {
            let target = self.object_path(key)?;
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::copy(source, &target).await?;

            tracing::debug!(key = %key, root = %self.root.display(), "Stored object");

            Ok(StoredObject {
                url: format!("{}/{}", self.public_base, key),
                key: key.to_string(),
            })
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let path = self.object_path(key)?;
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| Self::not_found(key, e))
        })
    }

    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Bytes>> {
        Box::pin(async move {
            let path = self.object_path(key)?;
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| Self::not_found(key, e))?;
            Ok(Bytes::from(data))
        })
    }

    fn owns(&self, url: &str) -> bool {
        url.strip_prefix(&self.public_base)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}
