//! REST endpoints for message history, send, edit, delete and file access.

use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::Claims;
use crate::chat::form::{IdList, UploadForm};
use crate::db::models::MessageView;
use crate::error::{AppError, Entity};
use crate::notify::{AttachmentChange, MessageEdit};
use crate::state::AppState;
use crate::store::NewMessage;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagesRequest {
    pub message_ids: IdList,
    #[serde(default)]
    pub is_delete_group_request: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteMessagesResponse {
    pub status: String,
    pub deleted: usize,
}

fn send_fields(form: &UploadForm) -> Result<(String, String, Option<f64>), AppError> {
    let chat_id = form.require("chatId")?.to_string();
    let content = form.text("content").unwrap_or_default().to_string();
    let duration = form.number("mediaDuration")?;
    if content.is_empty() && form.file.is_none() {
        return Err(AppError::Validation(
            "A message needs text content or an attachment".into(),
        ));
    }
    Ok((chat_id, content, duration))
}

fn update_fields(form: &UploadForm) -> Result<(String, String, Option<f64>), AppError> {
    let message_id = form.require("messageId")?.to_string();
    let content = form.text("updatedContent").unwrap_or_default().to_string();
    let duration = form.number("mediaDuration")?;
    Ok((message_id, content, duration))
}

// --- Handlers ---

/// GET /api/message/{chat_id}
/// Chat history, newest first, with senders populated. Members only.
pub async fn fetch_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let chat = state
        .store
        .find_chat(&chat_id)
        .await?
        .ok_or(AppError::NotFound(Entity::Chat))?;
    if !chat.has_member(&claims.sub) {
        return Err(AppError::Forbidden("Not a member of this chat".into()));
    }

    let messages = state.store.chat_messages(&chat_id).await?;
    Ok(Json(messages))
}

/// POST /api/message
/// Multipart: `chatId`, `content`, optional `attachment` file and `mediaDuration`.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    multipart: Multipart,
) -> Result<(StatusCode, Json<MessageView>), AppError> {
    let form = UploadForm::read(multipart, &state.uploads, "attachment").await?;

    let fields = send_fields(&form);
    let (chat_id, content, duration) = match fields {
        Ok(fields) => fields,
        Err(e) => {
            form.discard().await;
            return Err(e);
        }
    };

    let attachment = match &form.file {
        Some(file) => Some(state.attachments.store(file, duration).await?),
        None => None,
    };

    let result = state
        .engine
        .record_message(NewMessage {
            sender_id: claims.sub.clone(),
            chat_id,
            content,
            attachment: attachment.clone(),
        })
        .await;

    match result {
        Ok(view) => {
            tracing::info!(message_id = %view.id, sender = %claims.sub, "Message sent");
            Ok((StatusCode::CREATED, Json(view)))
        }
        Err(e) => {
            if let Some(stored) = &attachment {
                state.attachments.release_logged(stored).await;
            }
            Err(e)
        }
    }
}

/// PUT /api/message/update
/// Multipart: `messageId`, `updatedContent`, `msgFileRemoved`, optional
/// replacement `attachment` and `mediaDuration`.
pub async fn update_message(
    State(state): State<AppState>,
    claims: Claims,
    multipart: Multipart,
) -> Result<Json<MessageView>, AppError> {
    let form = UploadForm::read(multipart, &state.uploads, "attachment").await?;

    let fields = update_fields(&form);
    let (message_id, content, duration) = match fields {
        Ok(fields) => fields,
        Err(e) => {
            form.discard().await;
            return Err(e);
        }
    };

    let change = match &form.file {
        Some(file) => AttachmentChange::Replace(state.attachments.store(file, duration).await?),
        None if form.flag("msgFileRemoved") => AttachmentChange::Remove,
        None => AttachmentChange::Keep,
    };

    let view = state
        .engine
        .on_message_edited(
            &message_id,
            &claims.sub,
            MessageEdit {
                content,
                attachment: change,
            },
        )
        .await?;

    tracing::info!(message_id = %message_id, editor = %claims.sub, "Message updated");
    Ok(Json(view))
}

/// PUT /api/message/delete
/// Batch delete of the caller's own messages. `isDeleteGroupRequest` marks
/// cleanup after a group was deleted: it is honored only when every chat the
/// batch touches is already gone, and then allows deleting any of their
/// messages without recomputing `last_message`.
pub async fn delete_messages(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DeleteMessagesRequest>,
) -> Result<Json<DeleteMessagesResponse>, AppError> {
    let ids = body.message_ids.into_vec()?;
    if ids.is_empty() {
        return Err(AppError::Validation("No messages to delete".into()));
    }

    let mut chat_exists: HashMap<String, bool> = HashMap::new();
    for id in &ids {
        let Some(message) = state.store.find_message(id).await? else {
            continue;
        };
        let exists = match chat_exists.get(&message.chat_id) {
            Some(exists) => *exists,
            None => {
                let exists = state.store.find_chat(&message.chat_id).await?.is_some();
                chat_exists.insert(message.chat_id.clone(), exists);
                exists
            }
        };
        if message.sender_id == claims.sub {
            continue;
        }
        if !body.is_delete_group_request || exists {
            return Err(AppError::Forbidden(
                "Only the sender can delete a message".into(),
            ));
        }
    }

    let teardown = body.is_delete_group_request
        && !chat_exists.is_empty()
        && chat_exists.values().all(|exists| !exists);
    if body.is_delete_group_request && !teardown {
        tracing::debug!(user_id = %claims.sub, "Teardown flag ignored for a live chat");
    }

    let outcome = state.engine.on_message_deleted(&ids, teardown).await?;

    Ok(Json(DeleteMessagesResponse {
        status: "Message(s) deleted".to_string(),
        deleted: outcome.deleted.len(),
    }))
}

/// GET /api/message/files/{key}
/// Raw bytes of a stored file attachment.
pub async fn access_attachment(
    State(state): State<AppState>,
    _claims: Claims,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = state.attachments.fetch_file(&key).await.map_err(|e| {
        tracing::debug!(key = %key, error = %e, "Attachment fetch failed");
        AppError::from(e)
    })?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}

