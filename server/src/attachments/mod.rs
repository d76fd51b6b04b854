//! Attachment storage. Images and generic files live in separate object
//! stores; the URL prefix of a stored attachment tells which store owns its blob.

pub mod fs;
pub mod upload;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::db::models::{Attachment, DisplayPicture};
use crate::store::BoxFuture;

pub use fs::FsObjectStore;
pub use upload::UploadedFile;

const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("object store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
}

/// A blob store addressed by key.
pub trait ObjectStore: Send + Sync {
    /// Copy the local file at `source` into the store under `key`.
    fn put<'a>(&'a self, source: &'a Path, key: &'a str) -> BoxFuture<'a, StorageResult<StoredObject>>;

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>>;

    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Bytes>>;

    /// True when `url` was handed out by this store.
    fn owns(&self, url: &str) -> bool;
}

/// True when the file name carries an image extension (case-insensitive).
pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Routes uploads and releases to the image or file store.
#[derive(Clone)]
pub struct AttachmentRouter {
    images: Arc<dyn ObjectStore>,
    files: Arc<dyn ObjectStore>,
}

impl AttachmentRouter {
    pub fn new(images: Arc<dyn ObjectStore>, files: Arc<dyn ObjectStore>) -> Self {
        Self { images, files }
    }

    /// Move an uploaded temp file into its store and describe the result.
    /// The temp file is removed whether or not the store accepted it.
    pub async fn store(
        &self,
        upload: &UploadedFile,
        duration: Option<f64>,
    ) -> StorageResult<Attachment> {
        let result = if is_image_name(&upload.original_name) {
            self.images
                .put(&upload.path, &upload.key)
                .await
                .map(|stored| Attachment::Image {
                    url: stored.url,
                    key: stored.key,
                })
        } else {
            self.files
                .put(&upload.path, &upload.key)
                .await
                .map(|stored| Attachment::GenericFile {
                    url: stored.url,
                    key: stored.key,
                    name: upload.original_name.clone(),
                    size: upload.size,
                    duration,
                })
        };
        upload.discard().await;
        result
    }

    /// Store an uploaded group or profile picture in the image store.
    pub async fn store_picture(&self, upload: &UploadedFile) -> StorageResult<DisplayPicture> {
        let result = self.images.put(&upload.path, &upload.key).await;
        upload.discard().await;
        let stored = result?;
        Ok(DisplayPicture {
            url: stored.url,
            key: Some(stored.key),
        })
    }

    /// Delete an attachment's blob from whichever store issued its URL.
    pub async fn release(&self, attachment: &Attachment) -> StorageResult<()> {
        if self.images.owns(attachment.url()) {
            self.images.delete(attachment.key()).await
        } else {
            self.files.delete(attachment.key()).await
        }
    }

    /// Release an attachment, logging instead of failing.
    pub async fn release_logged(&self, attachment: &Attachment) {
        if let Err(e) = self.release(attachment).await {
            tracing::warn!(key = %attachment.key(), error = %e, "Failed to release attachment");
        }
    }

    /// Release a stored picture. Default pictures own no blob.
    pub async fn release_picture(&self, picture: &DisplayPicture) -> StorageResult<()> {
        match &picture.key {
            Some(key) => self.images.delete(key).await,
            None => Ok(()),
        }
    }

    pub async fn fetch_file(&self, key: &str) -> StorageResult<Bytes> {
        self.files.fetch(key).await
    }
}
