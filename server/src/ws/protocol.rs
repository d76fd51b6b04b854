//! Wire protocol for the real-time channel.
//!
//! Every frame is a JSON text message `{"event": "<name>", "args": [...]}`.
//! Event names are part of the client contract and must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::db::models::MessageView;
use crate::error::ErrorBody;

#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("event {event} is missing argument {index}")]
    MissingArgument { event: &'static str, index: usize },
    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
}

/// A user referenced in a relayed payload: either a bare id or a record
/// carrying `id` (or `_id`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MemberRef {
    Id(String),
    Record {
        #[serde(alias = "_id")]
        id: String,
    },
}

impl MemberRef {
    pub fn id(&self) -> &str {
        match self {
            MemberRef::Id(id) | MemberRef::Record { id } => id,
        }
    }
}

/// The part of a relayed chat payload that names its members.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMembers {
    #[serde(default)]
    pub users: Vec<MemberRef>,
}

impl ChatMembers {
    pub fn ids(&self) -> Vec<String> {
        self.users.iter().map(|u| u.id().to_string()).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessageData {
    #[serde(alias = "deletedMsgId")]
    pub message_id: String,
    pub sender_id: String,
    pub chat: ChatMembers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedMessageData {
    pub sender: MemberRef,
    pub chat: ChatMembers,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroupData {
    pub admin: MemberRef,
    pub new_group: ChatMembers,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedGroup {
    #[serde(default)]
    pub users: Vec<MemberRef>,
    #[serde(default)]
    pub removed_user: Option<MemberRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedGroupData {
    pub updater: MemberRef,
    pub updated_group: UpdatedGroup,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedGroupData {
    pub admin: MemberRef,
    pub deleted_group: ChatMembers,
}

/// Inbound events. Relay payloads keep their raw JSON so they can be
/// forwarded exactly as the client sent them.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    InitSession { user_id: String },
    JoinChat { chat_id: String },
    MessageSent { message_id: String },
    MessageDeleted { data: DeletedMessageData, raw: Value },
    MessageUpdated { data: UpdatedMessageData, raw: Value },
    GroupCreated { data: NewGroupData },
    GroupUpdated { data: UpdatedGroupData, raw: Value },
    GroupDeleted { data: DeletedGroupData, raw: Value },
    Typing { chat: Value, user: Value },
    StopTyping { chat: Value, user: Value },
    Disconnect,
}

fn arg(args: &[Value], event: &'static str, index: usize) -> Result<Value, ProtocolError> {
    match args.get(index) {
        Some(Value::Null) | None => Err(ProtocolError::MissingArgument { event, index }),
        Some(value) => Ok(value.clone()),
    }
}

fn typed<T: for<'de> Deserialize<'de>>(
    event: &'static str,
    value: &Value,
) -> Result<T, ProtocolError> {
    T::deserialize(value).map_err(|e| ProtocolError::InvalidPayload {
        event,
        reason: e.to_string(),
    })
}

/// An id argument: a bare string, or a record with `id`/`_id`.
fn id_arg(args: &[Value], event: &'static str) -> Result<String, ProtocolError> {
    let value = arg(args, event, 0)?;
    Ok(typed::<MemberRef>(event, &value)?.id().to_string())
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let args = frame.args.as_slice();

        match frame.event.as_str() {
            "init-session" => Ok(Self::InitSession {
                user_id: id_arg(args, "init-session")?,
            }),
            "join-chat" => Ok(Self::JoinChat {
                chat_id: id_arg(args, "join-chat")?,
            }),
            "message-sent" => Ok(Self::MessageSent {
                message_id: id_arg(args, "message-sent")?,
            }),
            "message-deleted" => {
                let raw = arg(args, "message-deleted", 0)?;
                Ok(Self::MessageDeleted {
                    data: typed("message-deleted", &raw)?,
                    raw,
                })
            }
            "message-updated" => {
                let raw = arg(args, "message-updated", 0)?;
                Ok(Self::MessageUpdated {
                    data: typed("message-updated", &raw)?,
                    raw,
                })
            }
            "group-created" => {
                let raw = arg(args, "group-created", 0)?;
                Ok(Self::GroupCreated {
                    data: typed("group-created", &raw)?,
                })
            }
            "group-updated" => {
                let raw = arg(args, "group-updated", 0)?;
                Ok(Self::GroupUpdated {
                    data: typed("group-updated", &raw)?,
                    raw,
                })
            }
            "group-deleted" => {
                let raw = arg(args, "group-deleted", 0)?;
                Ok(Self::GroupDeleted {
                    data: typed("group-deleted", &raw)?,
                    raw,
                })
            }
            // Typing payloads are checked by the handler, which drops
            // incomplete ones silently.
            "typing" => Ok(Self::Typing {
                chat: args.first().cloned().unwrap_or(Value::Null),
                user: args.get(1).cloned().unwrap_or(Value::Null),
            }),
            "stop-typing" => Ok(Self::StopTyping {
                chat: args.first().cloned().unwrap_or(Value::Null),
                user: args.get(1).cloned().unwrap_or(Value::Null),
            }),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InitSession { .. } => "init-session",
            Self::JoinChat { .. } => "join-chat",
            Self::MessageSent { .. } => "message-sent",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::MessageUpdated { .. } => "message-updated",
            Self::GroupCreated { .. } => "group-created",
            Self::GroupUpdated { .. } => "group-updated",
            Self::GroupDeleted { .. } => "group-deleted",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop-typing",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Outbound events, addressed per recipient.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    SessionReady,
    MessageReceived {
        message: MessageView,
        notifications: Vec<MessageView>,
    },
    MessageRemoved(Value),
    MessageModified(Value),
    GroupDisplayNew,
    GroupDisplayUpdated(Value),
    GroupDisplayRemoved(Value),
    TypingShown { chat: Value, user: Value },
    TypingHidden { chat: Value, user: Value },
    Error(ErrorBody),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionReady => "session-ready",
            Self::MessageReceived { .. } => "message-received",
            Self::MessageRemoved(_) => "message-removed",
            Self::MessageModified(_) => "message-modified",
            Self::GroupDisplayNew => "group-display-new",
            Self::GroupDisplayUpdated(_) => "group-display-updated",
            Self::GroupDisplayRemoved(_) => "group-display-removed",
            Self::TypingShown { .. } => "typing-shown",
            Self::TypingHidden { .. } => "typing-hidden",
            Self::Error(_) => "error",
        }
    }

    fn args(&self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(match self {
            Self::SessionReady | Self::GroupDisplayNew => vec![],
            Self::MessageReceived {
                message,
                notifications,
            } => vec![
                serde_json::to_value(message)?,
                serde_json::to_value(notifications)?,
            ],
            Self::MessageRemoved(v)
            | Self::MessageModified(v)
            | Self::GroupDisplayUpdated(v)
            | Self::GroupDisplayRemoved(v) => vec![v.clone()],
            Self::TypingShown { chat, user } | Self::TypingHidden { chat, user } => {
                vec![chat.clone(), user.clone()]
            }
            Self::Error(body) => vec![serde_json::to_value(body)?],
        })
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Frame {
            event: self.name().to_string(),
            args: self.args()?,
        })
    }
}
