//! REST endpoints for direct chats and the caller's chat list.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::auth::Claims;
use crate::db::models::{ChatKind, ChatView, DisplayPicture};
use crate::error::{AppError, Entity};
use crate::state::AppState;
use crate::store::NewChat;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectChatRequest {
    pub user_id: String,
}

/// Populated view of a chat that is known to exist.
pub(crate) async fn view_of(state: &AppState, chat_id: &str) -> Result<ChatView, AppError> {
    state
        .store
        .chat_view(chat_id)
        .await?
        .ok_or(AppError::NotFound(Entity::Chat))
}

/// POST /api/chat
/// Return the direct chat between the caller and `userId`, creating it on
/// first request (201). Find-then-create is not atomic: two racing first
/// requests can still create two chats.
pub async fn create_or_retrieve_chat(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DirectChatRequest>,
) -> Result<(StatusCode, Json<ChatView>), AppError> {
    let other = body.user_id.trim();
    if other.is_empty() {
        return Err(AppError::Validation("userId is required".into()));
    }
    if other == claims.sub {
        return Err(AppError::Validation("Cannot open a chat with yourself".into()));
    }
    if state.store.find_user(other).await?.is_none() {
        return Err(AppError::NotFound(Entity::User));
    }

    if let Some(existing) = state.store.find_direct_chat(&claims.sub, other).await? {
        return Ok((StatusCode::OK, Json(view_of(&state, &existing.id).await?)));
    }

    let created = state
        .store
        .create_chat(NewChat {
            name: "direct".to_string(),
            kind: ChatKind::Direct,
            members: vec![other.to_string(), claims.sub.clone()],
            admins: Vec::new(),
            picture: DisplayPicture::default_with_url(""),
        })
        .await?;

    tracing::info!(chat_id = %created.id, a = %claims.sub, b = %other, "Direct chat created");
    Ok((StatusCode::CREATED, Json(view_of(&state, &created.id).await?)))
}

/// GET /api/chat
/// Every chat the caller belongs to, most recently updated first.
pub async fn fetch_chats(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChatView>>, AppError> {
    let chats = state.store.chats_for_user(&claims.sub).await?;
    Ok(Json(chats))
}
