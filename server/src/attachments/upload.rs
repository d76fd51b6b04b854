//! Staging of multipart file fields on local disk before they are stored.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use chrono::Utc;
use rand::Rng;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;

/// A file received from a client, staged in the upload directory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    /// Unique object key: `<millis><random>---<original name>`.
    pub key: String,
    pub original_name: String,
    pub size: u64,
}

impl UploadedFile {
    /// Best-effort removal of the staged copy.
    pub async fn discard(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::debug!(path = %self.path.display(), error = %e, "Staged upload already gone");
        }
    }

    #[cfg(test)]
    pub async fn write_for_test(dir: &Path, name: &str, data: &[u8]) -> Self {
        let key = unique_key(name);
        let path = dir.join(&key);
        tokio::fs::write(&path, data).await.unwrap();
        Self {
            path,
            key,
            original_name: name.to_string(),
            size: data.len() as u64,
        }
    }
}

/// Build a collision-resistant object key that keeps the original name readable.
pub fn unique_key(original_name: &str) -> String {
    let cleaned: String = original_name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    let salt: u32 = rand::rng().random_range(0..1_000_000);
    format!("{}{:06}---{}", Utc::now().timestamp_millis(), salt, cleaned)
}

/// Write a multipart file field into `upload_dir`.
pub async fn save_field(
    field: Field<'_>,
    upload_dir: &Path,
    max_bytes: usize,
) -> Result<UploadedFile, AppError> {
    let original_name = field
        .file_name()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("Uploaded file has no name".into()))?;

    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("Could not read uploaded file: {}", e)))?;

    if data.len() > max_bytes {
        tracing::warn!(size = data.len(), limit = max_bytes, "Upload rejected, too large");
        return Err(AppError::Validation(format!(
            "File exceeds the {} byte upload limit",
            max_bytes
        )));
    }

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::Internal(format!("upload dir unavailable: {}", e)))?;

    let key = unique_key(&original_name);
    let path = upload_dir.join(&key);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AppError::Internal(format!("could not stage upload: {}", e)))?;
    file.write_all(&data)
        .await
        .map_err(|e| AppError::Internal(format!("could not stage upload: {}", e)))?;
    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("could not stage upload: {}", e)))?;

    tracing::debug!(key = %key, size = data.len(), "Upload staged");

    Ok(UploadedFile {
        path,
        key,
        original_name,
        size: data.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_key_keeps_name_and_strips_separators() {
        let key = unique_key("../notes/today.txt");
        let (prefix, name) = key.split_once("---").unwrap();
        assert!(prefix.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(name, ".._notes_today.txt");
        assert_ne!(unique_key("a.txt"), unique_key("a.txt"));
    }
}
