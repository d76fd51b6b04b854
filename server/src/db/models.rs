//! Records persisted by the store, and the populated views handed to clients.
//! Record types correspond to the SQLite schema in migrations.rs.

use serde::{Deserialize, Serialize};

/// Picture reference for a user profile or a group chat.
/// `key` is `None` when the picture is the configured default (nothing to release).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPicture {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl DisplayPicture {
    pub fn default_with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.key.is_none()
    }
}

/// User record in the users table, with its notification list
/// (message ids, insertion order) loaded from user_notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub profile_pic: DisplayPicture,
    pub notifications: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Public projection of a user: never carries credentials or notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub profile_pic: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            profile_pic: user.profile_pic.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    Group,
}

/// Chat record. Members keep join order; admins are a subset of members
/// (empty for direct chats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub kind: ChatKind,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub last_message: Option<String>,
    pub picture: DisplayPicture,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }
}

/// Stored attachment descriptor. Persisted as JSON in messages.attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Image {
        url: String,
        key: String,
    },
    GenericFile {
        url: String,
        key: String,
        name: String,
        size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
}

impl Attachment {
    pub fn url(&self) -> &str {
        match self {
            Attachment::Image { url, .. } | Attachment::GenericFile { url, .. } => url,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Attachment::Image { key, .. } | Attachment::GenericFile { key, .. } => key,
        }
    }
}

/// Message record. `content` may be empty only when `attachment` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub attachment: Option<Attachment>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    pub fn has_body(&self) -> bool {
        !self.content.trim().is_empty() || self.attachment.is_some()
    }
}

/// Chat as embedded in a message view: members are ids only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub kind: ChatKind,
    pub users: Vec<String>,
    pub last_message: Option<String>,
    pub picture: String,
    pub updated_at: i64,
}

impl From<&Chat> for ChatSummary {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id.clone(),
            name: chat.name.clone(),
            kind: chat.kind,
            users: chat.members.clone(),
            last_message: chat.last_message.clone(),
            picture: chat.picture.url.clone(),
            updated_at: chat.updated_at,
        }
    }
}

/// Message with sender and chat populated.
/// `chat` is `None` once the owning chat has been deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub sender: UserSummary,
    pub chat: Option<ChatSummary>,
    pub content: String,
    pub attachment: Option<Attachment>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Chat with members, admins and last message populated (chat list entries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatView {
    pub id: String,
    pub name: String,
    pub kind: ChatKind,
    pub users: Vec<UserSummary>,
    pub admins: Vec<UserSummary>,
    pub last_message: Option<MessageView>,
    pub picture: DisplayPicture,
    pub created_at: i64,
    pub updated_at: i64,
}
