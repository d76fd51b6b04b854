//! REST endpoints for group chat management.
//!
//! Every group keeps at least one admin, and admins are always members.
//! Membership changes go through the notification engine, which leaves
//! existing notification lists untouched.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use futures_util::future::join;
use serde::{Deserialize, Serialize};

use crate::auth::Claims;
use crate::chat::chats::view_of;
use crate::chat::form::{id_list, IdList, UploadForm};
use crate::db::models::{Chat, ChatKind, ChatView, DisplayPicture};
use crate::error::{AppError, Entity};
use crate::state::AppState;
use crate::store::{ChatPatch, NewChat};

/// Minimum number of other users needed to start a group.
const MIN_GROUP_INVITEES: usize = 2;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameGroupRequest {
    pub chat_id: String,
    pub group_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRequest {
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUsersRequest {
    pub chat_id: String,
    pub users_to_be_added: IdList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveUserRequest {
    pub chat_id: String,
    pub user_to_be_removed: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRequest {
    pub chat_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteGroupResponse {
    pub status: String,
    pub deleted_messages: usize,
}

// --- Helpers ---

/// Load a group the caller belongs to.
async fn member_group(state: &AppState, chat_id: &str, caller: &str) -> Result<Chat, AppError> {
    let chat = state
        .store
        .find_chat(chat_id)
        .await?
        .ok_or(AppError::NotFound(Entity::Chat))?;
    if !chat.is_group() {
        return Err(AppError::Validation("Not a group chat".into()));
    }
    if !chat.has_member(caller) {
        return Err(AppError::Forbidden("Not a member of this group".into()));
    }
    Ok(chat)
}

/// Load a group the caller administers.
async fn admin_group(state: &AppState, chat_id: &str, caller: &str) -> Result<Chat, AppError> {
    let chat = member_group(state, chat_id, caller).await?;
    if !chat.is_admin(caller) {
        return Err(AppError::Forbidden("Only a group admin can do that".into()));
    }
    Ok(chat)
}

async fn apply(state: &AppState, chat_id: &str, patch: ChatPatch) -> Result<ChatView, AppError> {
    state
        .store
        .update_chat(chat_id, patch)
        .await?
        .ok_or(AppError::NotFound(Entity::Chat))?;
    view_of(state, chat_id).await
}

async fn ensure_users_exist(state: &AppState, user_ids: &[String]) -> Result<(), AppError> {
    for user_id in user_ids {
        if state.store.find_user(user_id).await?.is_none() {
            return Err(AppError::NotFound(Entity::User));
        }
    }
    Ok(())
}

fn creation_fields(form: &UploadForm, caller: &str) -> Result<(String, Vec<String>), AppError> {
    let name = form.require("chatName")?.to_string();
    let mut invitees = id_list(form.require("users")?)?;
    invitees.retain(|id| id != caller);
    invitees.sort();
    invitees.dedup();
    if invitees.len() < MIN_GROUP_INVITEES {
        return Err(AppError::Validation(format!(
            "A group needs at least {} other users",
            MIN_GROUP_INVITEES
        )));
    }
    Ok((name, invitees))
}

// --- Handlers ---

/// POST /api/chat/group
/// Multipart: `chatName`, `users` (JSON array of ids), optional `displayPic`.
/// The caller becomes the first member and the only admin.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ChatView>), AppError> {
    let form = UploadForm::read(multipart, &state.uploads, "displayPic").await?;

    let checked = match creation_fields(&form, &claims.sub) {
        Ok((name, invitees)) => ensure_users_exist(&state, &invitees)
            .await
            .map(|()| (name, invitees)),
        Err(e) => Err(e),
    };
    let (name, invitees) = match checked {
        Ok(fields) => fields,
        Err(e) => {
            form.discard().await;
            return Err(e);
        }
    };

    let picture = match &form.file {
        Some(file) => state.attachments.store_picture(file).await?,
        None => DisplayPicture::default_with_url(&state.default_group_picture),
    };

    let mut members = vec![claims.sub.clone()];
    members.extend(invitees);

    let created = state
        .store
        .create_chat(NewChat {
            name,
            kind: ChatKind::Group,
            members,
            admins: vec![claims.sub.clone()],
            picture: picture.clone(),
        })
        .await;
    let created = match created {
        Ok(chat) => chat,
        Err(e) => {
            if let Err(release) = state.attachments.release_picture(&picture).await {
                tracing::warn!(error = %release, "Failed to release group picture");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        chat_id = %created.id,
        admin = %claims.sub,
        members = created.members.len(),
        "Group created"
    );
    Ok((StatusCode::CREATED, Json(view_of(&state, &created.id).await?)))
}

/// PUT /api/chat/group/name
pub async fn rename_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<RenameGroupRequest>,
) -> Result<Json<ChatView>, AppError> {
    let name = body.group_name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("groupName is required".into()));
    }
    member_group(&state, &body.chat_id, &claims.sub).await?;

    let view = apply(&state, &body.chat_id, ChatPatch::rename(name)).await?;
    tracing::info!(chat_id = %body.chat_id, by = %claims.sub, "Group renamed");
    Ok(Json(view))
}

/// PUT /api/chat/group/picture
/// Multipart: `chatId`, `displayPic`. The old picture is released while the
/// new one is saved.
pub async fn update_group_picture(
    State(state): State<AppState>,
    claims: Claims,
    multipart: Multipart,
) -> Result<Json<ChatView>, AppError> {
    let form = UploadForm::read(multipart, &state.uploads, "displayPic").await?;

    let group = match picture_target(&state, &form, &claims.sub).await {
        Ok(group) => group,
        Err(e) => {
            form.discard().await;
            return Err(e);
        }
    };
    let Some(file) = &form.file else {
        return Err(AppError::Validation("displayPic is required".into()));
    };

    let fresh = state.attachments.store_picture(file).await?;

    let (updated, released) = join(
        state
            .store
            .update_chat(&group.id, ChatPatch::picture(fresh.clone())),
        state.attachments.release_picture(&group.picture),
    )
    .await;
    if let Err(e) = released {
        tracing::warn!(chat_id = %group.id, error = %e, "Failed to release old group picture");
    }

    let outcome = match updated {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(AppError::NotFound(Entity::Chat)),
        Err(e) => Err(AppError::from(e)),
    };
    if let Err(e) = outcome {
        if let Err(release) = state.attachments.release_picture(&fresh).await {
            tracing::warn!(error = %release, "Failed to release unused group picture");
        }
        return Err(e);
    }

    tracing::info!(chat_id = %group.id, by = %claims.sub, "Group picture replaced");
    Ok(Json(view_of(&state, &group.id).await?))
}

async fn picture_target(state: &AppState, form: &UploadForm, caller: &str) -> Result<Chat, AppError> {
    let chat_id = form.require("chatId")?;
    if form.file.is_none() {
        return Err(AppError::Validation("displayPic is required".into()));
    }
    admin_group(state, chat_id, caller).await
}

/// PUT /api/chat/group/picture/remove
/// Restore the default picture. A group already on the default is rejected.
pub async fn remove_group_picture(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<GroupRequest>,
) -> Result<Json<ChatView>, AppError> {
    let group = admin_group(&state, &body.chat_id, &claims.sub).await?;
    if group.picture.is_default() {
        return Err(AppError::Validation("The default group picture cannot be removed".into()));
    }

    let default = DisplayPicture::default_with_url(&state.default_group_picture);
    let (updated, released) = join(
        state.store.update_chat(&group.id, ChatPatch::picture(default)),
        state.attachments.release_picture(&group.picture),
    )
    .await;
    if let Err(e) = released {
        tracing::warn!(chat_id = %group.id, error = %e, "Failed to release group picture");
    }
    updated?.ok_or(AppError::NotFound(Entity::Chat))?;

    tracing::info!(chat_id = %group.id, by = %claims.sub, "Group picture removed");
    Ok(Json(view_of(&state, &group.id).await?))
}

/// PUT /api/chat/group/add
pub async fn add_users(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<AddUsersRequest>,
) -> Result<Json<ChatView>, AppError> {
    let mut user_ids = body.users_to_be_added.into_vec()?;
    if user_ids.is_empty() {
        return Err(AppError::Validation("No users to add".into()));
    }
    let group = admin_group(&state, &body.chat_id, &claims.sub).await?;

    user_ids.retain(|id| !group.has_member(id));
    user_ids.sort();
    user_ids.dedup();
    ensure_users_exist(&state, &user_ids).await?;

    let view = apply(
        &state,
        &group.id,
        ChatPatch {
            add_members: user_ids.clone(),
            ..ChatPatch::default()
        },
    )
    .await?;
    state.engine.on_membership_changed(&group.id, &user_ids, &[]);
    Ok(Json(view))
}

/// PUT /api/chat/group/remove
/// Admins may remove anyone; any member may remove themselves. The removed
/// user loses any admin role but keeps their notification references.
pub async fn remove_user(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<RemoveUserRequest>,
) -> Result<Json<ChatView>, AppError> {
    let target = body.user_to_be_removed.trim();
    let group = member_group(&state, &body.chat_id, &claims.sub).await?;
    if target != claims.sub && !group.is_admin(&claims.sub) {
        return Err(AppError::Forbidden("Only a group admin can remove members".into()));
    }
    if !group.has_member(target) {
        return Err(AppError::NotFound(Entity::User));
    }
    if group.is_admin(target) && group.admins.len() == 1 {
        return Err(AppError::Validation(
            "The last admin cannot leave; appoint another admin first".into(),
        ));
    }

    let removed = vec![target.to_string()];
    let view = apply(
        &state,
        &group.id,
        ChatPatch {
            remove_members: removed.clone(),
            ..ChatPatch::default()
        },
    )
    .await?;
    state.engine.on_membership_changed(&group.id, &[], &removed);
    Ok(Json(view))
}

/// PUT /api/chat/group/admin
pub async fn make_admin(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<AdminRequest>,
) -> Result<Json<ChatView>, AppError> {
    let group = admin_group(&state, &body.chat_id, &claims.sub).await?;
    if !group.has_member(&body.user_id) {
        return Err(AppError::Validation("Only members can become admins".into()));
    }
    if group.is_admin(&body.user_id) {
        return Ok(Json(view_of(&state, &group.id).await?));
    }

    let view = apply(
        &state,
        &group.id,
        ChatPatch {
            add_admins: vec![body.user_id.clone()],
            ..ChatPatch::default()
        },
    )
    .await?;
    tracing::info!(chat_id = %group.id, user_id = %body.user_id, "Admin appointed");
    Ok(Json(view))
}

/// PUT /api/chat/group/admin/dismiss
pub async fn dismiss_admin(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<AdminRequest>,
) -> Result<Json<ChatView>, AppError> {
    let group = admin_group(&state, &body.chat_id, &claims.sub).await?;
    if !group.is_admin(&body.user_id) {
        return Err(AppError::Validation("User is not an admin".into()));
    }
    if group.admins.len() == 1 {
        return Err(AppError::Validation("A group must keep at least one admin".into()));
    }

    let view = apply(
        &state,
        &group.id,
        ChatPatch {
            remove_admins: vec![body.user_id.clone()],
            ..ChatPatch::default()
        },
    )
    .await?;
    tracing::info!(chat_id = %group.id, user_id = %body.user_id, "Admin dismissed");
    Ok(Json(view))
}

/// PUT /api/chat/group/delete
/// Remove the group, release its picture and tear down its messages.
/// `last_message` is never recomputed during teardown.
pub async fn delete_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<GroupRequest>,
) -> Result<Json<DeleteGroupResponse>, AppError> {
    let group = admin_group(&state, &body.chat_id, &claims.sub).await?;
    let message_ids = state.store.chat_message_ids(&group.id).await?;

    let (deleted, released) = join(
        state.store.delete_chat(&group.id),
        state.attachments.release_picture(&group.picture),
    )
    .await;
    if let Err(e) = released {
        tracing::warn!(chat_id = %group.id, error = %e, "Failed to release group picture");
    }
    deleted?.ok_or(AppError::NotFound(Entity::Chat))?;

    let outcome = state.engine.on_message_deleted(&message_ids, true).await?;

    tracing::info!(
        chat_id = %group.id,
        by = %claims.sub,
        messages = outcome.deleted.len(),
        "Group deleted"
    );
    Ok(Json(DeleteGroupResponse {
        status: "Group deleted".to_string(),
        deleted_messages: outcome.deleted.len(),
    }))
}
