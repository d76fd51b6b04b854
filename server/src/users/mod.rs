//! REST endpoints for user search, the caller's profile and the caller's
//! notification list.

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use futures_util::future::join;
use serde::{Deserialize, Serialize};

use crate::auth::Claims;
use crate::chat::form::{IdList, UploadForm};
use crate::db::models::{DisplayPicture, MessageView, User, UserSummary};
use crate::error::{AppError, Entity};
use crate::state::AppState;
use crate::store::UserPatch;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissRequest {
    pub notification_ids: IdList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameUserRequest {
    pub new_user_name: String,
}

/// The caller's own profile with populated notifications. Never carries credentials.
#[derive(Debug, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub user: UserSummary,
    pub notifications: Vec<MessageView>,
}

/// GET /api/user?search=
/// Case-insensitive match on name or email. The caller is never listed.
pub async fn search_users(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    let users = state
        .store
        .search_users(query.search.trim(), &claims.sub)
        .await?;
    Ok(Json(users))
}

/// PUT /api/user/update/name
pub async fn update_user_name(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<RenameUserRequest>,
) -> Result<Json<ProfileView>, AppError> {
    let name = body.new_user_name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("newUserName is required".into()));
    }
    let user = state
        .store
        .update_user(&claims.sub, UserPatch::rename(name))
        .await?
        .ok_or(AppError::NotFound(Entity::User))?;

    tracing::info!(user_id = %claims.sub, "User renamed");
    Ok(Json(profile_of(&state, &user).await?))
}

/// PUT /api/user/update/profile-pic
/// Multipart: `profilePic`. The old picture is released while the new one is saved.
pub async fn update_profile_picture(
    State(state): State<AppState>,
    claims: Claims,
    multipart: Multipart,
) -> Result<Json<ProfileView>, AppError> {
    let form = UploadForm::read(multipart, &state.uploads, "profilePic").await?;
    let Some(file) = &form.file else {
        return Err(AppError::Validation("profilePic is required".into()));
    };
    let current = match current_user(&state, &claims.sub).await {
        Ok(user) => user,
        Err(e) => {
            form.discard().await;
            return Err(e);
        }
    };

    let fresh = state.attachments.store_picture(file).await?;

    let (updated, released) = join(
        state
            .store
            .update_user(&current.id, UserPatch::profile_pic(fresh.clone())),
        state.attachments.release_picture(&current.profile_pic),
    )
    .await;
    if let Err(e) = released {
        tracing::warn!(user_id = %current.id, error = %e, "Failed to release old profile picture");
    }

    let user = match updated {
        Ok(Some(user)) => user,
        other => {
            if let Err(release) = state.attachments.release_picture(&fresh).await {
                tracing::warn!(error = %release, "Failed to release unused profile picture");
            }
            return Err(match other {
                Err(e) => AppError::from(e),
                _ => AppError::NotFound(Entity::User),
            });
        }
    };

    tracing::info!(user_id = %user.id, "Profile picture replaced");
    Ok(Json(profile_of(&state, &user).await?))
}

/// PUT /api/user/delete/profile-pic
/// Restore the default picture. A user already on the default is rejected.
pub async fn remove_profile_picture(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ProfileView>, AppError> {
    let current = current_user(&state, &claims.sub).await?;
    if current.profile_pic.is_default() {
        return Err(AppError::Validation(
            "The default profile picture cannot be removed".into(),
        ));
    }

    let default = DisplayPicture::default_with_url(&state.default_user_picture);
    let (updated, released) = join(
        state
            .store
            .update_user(&current.id, UserPatch::profile_pic(default)),
        state.attachments.release_picture(&current.profile_pic),
    )
    .await;
    if let Err(e) = released {
        tracing::warn!(user_id = %current.id, error = %e, "Failed to release profile picture");
    }
    let user = updated?.ok_or(AppError::NotFound(Entity::User))?;

    tracing::info!(user_id = %user.id, "Profile picture removed");
    Ok(Json(profile_of(&state, &user).await?))
}

/// GET /api/user/notifications
pub async fn fetch_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<MessageView>>, AppError> {
    Ok(Json(state.engine.notifications_for(&claims.sub).await?))
}

/// PUT /api/user/notifications/dismiss
/// Returns the caller's remaining notifications.
pub async fn dismiss_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DismissRequest>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let ids = body.notification_ids.into_vec()?;
    let remaining = state.engine.dismiss_notifications(&claims.sub, ids).await?;
    tracing::debug!(user_id = %claims.sub, remaining = remaining.len(), "Notifications dismissed");
    Ok(Json(remaining))
}

async fn current_user(state: &AppState, user_id: &str) -> Result<User, AppError> {
    state
        .store
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotFound(Entity::User))
}

async fn profile_of(state: &AppState, user: &User) -> Result<ProfileView, AppError> {
    let notifications = state
        .store
        .message_views(user.notifications.clone())
        .await?;
    Ok(ProfileView {
        user: UserSummary::from(user),
        notifications,
    })
}
