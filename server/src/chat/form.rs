//! Multipart form reading for the upload endpoints.

use std::collections::HashMap;

use axum::extract::Multipart;
use serde::Deserialize;

use crate::attachments::upload::save_field;
use crate::attachments::UploadedFile;
use crate::error::AppError;
use crate::state::UploadSettings;

/// Text fields of a multipart form plus at most one staged file.
#[derive(Debug, Default)]
pub struct UploadForm {
    fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl UploadForm {
    /// Read every part. The part named `file_field` is staged to disk; other
    /// parts are read as text. A staged file is discarded if a later part fails.
    pub async fn read(
        mut multipart: Multipart,
        uploads: &UploadSettings,
        file_field: &str,
    ) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        let result = form.read_parts(&mut multipart, uploads, file_field).await;
        if let Err(e) = result {
            form.discard().await;
            return Err(e);
        }
        Ok(form)
    }

    async fn read_parts(
        &mut self,
        multipart: &mut Multipart,
        uploads: &UploadSettings,
        file_field: &str,
    ) -> Result<(), AppError> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == file_field {
                if self.file.is_some() {
                    return Err(AppError::Validation(format!(
                        "Only one {} may be uploaded",
                        file_field
                    )));
                }
                self.file = Some(save_field(field, &uploads.dir, uploads.max_bytes).await?);
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Unreadable field {}: {}", name, e)))?;
                self.fields.insert(name, value);
            }
        }
        Ok(())
    }

    /// A text field, trimmed. Blank, `undefined` and `null` count as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty() && *v != "undefined" && *v != "null")
    }

    /// A required text field.
    pub fn require(&self, name: &str) -> Result<&str, AppError> {
        self.text(name)
            .ok_or_else(|| AppError::Validation(format!("Missing field {}", name)))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.text(name) == Some("true")
    }

    pub fn number(&self, name: &str) -> Result<Option<f64>, AppError> {
        self.text(name)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| AppError::Validation(format!("Field {} is not a number", name)))
            })
            .transpose()
    }

    /// Remove the staged file, if any.
    pub async fn discard(&self) {
        if let Some(file) = &self.file {
            file.discard().await;
        }
    }
}

/// Parse a list field sent either as a JSON array string or a single id.
pub fn id_list(raw: &str) -> Result<Vec<String>, AppError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|e| AppError::Validation(format!("Invalid id list: {}", e)))
    } else if trimmed.is_empty() {
        Ok(Vec::new())
    } else {
        Ok(vec![trimmed.to_string()])
    }
}

/// An id list in a JSON body: either an array or that array encoded as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IdList {
    List(Vec<String>),
    Encoded(String),
}

impl IdList {
    pub fn into_vec(self) -> Result<Vec<String>, AppError> {
        match self {
            IdList::List(ids) => Ok(ids),
            IdList::Encoded(raw) => id_list(&raw),
        }
    }
}
