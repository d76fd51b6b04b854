//! Persistence boundary for users, chats, messages and notification lists.
//!
//! Every operation is atomic on its own; nothing spans two calls. Callers
//! compose operations and accept the interleavings that follow.

pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::db::models::{
    Attachment, Chat, ChatKind, ChatView, DisplayPicture, Message, MessageView, User, UserSummary,
};

pub use sqlite::SqliteStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    Operation(#[from] rusqlite::Error),
    #[error("conflicting record: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub profile_pic: DisplayPicture,
}

#[derive(Debug, Clone)]
pub struct NewChat {
    pub name: String,
    pub kind: ChatKind,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub picture: DisplayPicture,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub attachment: Option<Attachment>,
}

/// Partial chat update. Absent fields are left untouched; any applied patch
/// bumps `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct ChatPatch {
    pub name: Option<String>,
    pub picture: Option<DisplayPicture>,
    /// `Some(None)` clears the last message pointer.
    pub last_message: Option<Option<String>>,
    pub add_members: Vec<String>,
    pub remove_members: Vec<String>,
    pub add_admins: Vec<String>,
    pub remove_admins: Vec<String>,
}

impl ChatPatch {
    pub fn last_message(message_id: Option<String>) -> Self {
        Self {
            last_message: Some(message_id),
            ..Self::default()
        }
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn picture(picture: DisplayPicture) -> Self {
        Self {
            picture: Some(picture),
            ..Self::default()
        }
    }
}

/// Partial profile update. Any applied patch bumps `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub profile_pic: Option<DisplayPicture>,
}

impl UserPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn profile_pic(picture: DisplayPicture) -> Self {
        Self {
            profile_pic: Some(picture),
            ..Self::default()
        }
    }
}

/// Full replacement of a message body.
#[derive(Debug, Clone)]
pub struct MessagePatch {
    pub content: String,
    pub attachment: Option<Attachment>,
}

pub trait ChatStore: Send + Sync {
    // --- users ---

    fn create_user(&self, user: NewUser) -> BoxFuture<'_, StoreResult<User>>;

    fn find_user(&self, user_id: &str) -> BoxFuture<'_, StoreResult<Option<User>>>;

    /// Returns the updated user, or `None` if it does not exist.
    fn update_user(
        &self,
        user_id: &str,
        patch: UserPatch,
    ) -> BoxFuture<'_, StoreResult<Option<User>>>;

    /// Case-insensitive match on name or email, excluding `exclude`.
    fn search_users(
        &self,
        query: &str,
        exclude: &str,
    ) -> BoxFuture<'_, StoreResult<Vec<UserSummary>>>;

    // --- chats ---

    fn create_chat(&self, chat: NewChat) -> BoxFuture<'_, StoreResult<Chat>>;

    fn find_chat(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<Chat>>>;

    /// The direct chat whose members are exactly `a` and `b`, if any.
    fn find_direct_chat(&self, a: &str, b: &str) -> BoxFuture<'_, StoreResult<Option<Chat>>>;

    fn update_chat(
        &self,
        chat_id: &str,
        patch: ChatPatch,
    ) -> BoxFuture<'_, StoreResult<Option<Chat>>>;

    /// Removes the chat record and returns it. Messages are left in place.
    fn delete_chat(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<Chat>>>;

    fn chat_view(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<ChatView>>>;

    /// Chats containing `user_id`, most recently updated first.
    fn chats_for_user(&self, user_id: &str) -> BoxFuture<'_, StoreResult<Vec<ChatView>>>;

    // --- messages ---

    fn create_message(&self, message: NewMessage) -> BoxFuture<'_, StoreResult<Message>>;

    fn find_message(&self, message_id: &str) -> BoxFuture<'_, StoreResult<Option<Message>>>;

    fn update_message(
        &self,
        message_id: &str,
        patch: MessagePatch,
    ) -> BoxFuture<'_, StoreResult<Option<Message>>>;

    fn delete_message(&self, message_id: &str) -> BoxFuture<'_, StoreResult<Option<Message>>>;

    /// Newest message in the chat; ties on timestamp go to the later insert.
    fn latest_message(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<Message>>>;

    fn chat_message_ids(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Vec<String>>>;

    /// Populated views for `ids`, in the given order. Unknown ids are skipped.
    fn message_views(&self, ids: Vec<String>) -> BoxFuture<'_, StoreResult<Vec<MessageView>>>;

    /// Populated history of a chat, newest first.
    fn chat_messages(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Vec<MessageView>>>;

    // --- notifications ---

    /// Appends `message_id` to the user's list unless it is already there.
    /// Returns the list afterwards, or `None` if the user does not exist.
    fn push_notification(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> BoxFuture<'_, StoreResult<Option<Vec<String>>>>;

    /// Removes every occurrence of each id in `message_ids` from the user's list.
    fn pull_notifications(
        &self,
        user_id: &str,
        message_ids: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<Option<Vec<String>>>>;

    /// Removes references to `message_ids` from every user. Returns the ids
    /// of users whose lists changed.
    fn purge_notifications(
        &self,
        message_ids: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<Vec<String>>>;

    fn notifications(&self, user_id: &str) -> BoxFuture<'_, StoreResult<Option<Vec<String>>>>;
}
