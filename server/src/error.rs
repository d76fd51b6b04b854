//! Error taxonomy for chat actions and its HTTP rendering.
//!
//! Every error renders as `{ "status": "Client error" | "Server error", "message": ... }`.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attachments::StorageError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Chat,
    Message,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::User => "User",
            Entity::Chat => "Chat",
            Entity::Message => "Message",
        })
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("{0}")]
    Forbidden(String),
    #[error("Not authorized, token missing or invalid")]
    Unauthorized,
    #[error("attachment storage failed: {0}")]
    UpstreamStorage(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::UpstreamStorage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::UpstreamStorage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            AppError::UpstreamStorage(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// "Client error" for 4xx, "Server error" otherwise.
    pub fn classification(&self) -> &'static str {
        if self.status_code().is_client_error() {
            "Client error"
        } else {
            "Server error"
        }
    }

    pub fn body(&self) -> ErrorBody {
        let message = match self {
            AppError::Store(StoreError::Conflict(msg)) => msg.clone(),
            AppError::Store(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            status: self.classification().to_string(),
            message,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_keep_their_message() {
        let err = AppError::NotFound(Entity::Chat);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        let body = err.body();
        assert_eq!(body.status, "Client error");
        assert_eq!(body.message, "Chat not found");
    }

    #[test]
    fn test_store_failures_hide_details() {
        let err = AppError::Store(StoreError::Unavailable("lock poisoned".into()));
        let body = err.body();
        assert_eq!(body.status, "Server error");
        assert_eq!(body.message, "Internal server error");
    }

    #[test]
    fn test_missing_blob_is_not_found() {
        let err = AppError::from(StorageError::NotFound("k".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.classification(), "Client error");
    }
}
