//! Inbound event handling for the real-time channel.
//!
//! Mutations are persisted by the REST layer; the client then relays the
//! matching event here and it is fanned out to every other affected user.
//! `message-sent` is the one relay that also updates persisted state: it
//! drives the notification engine before delivering.

use std::ops::ControlFlow;

use serde_json::Value;

use super::protocol::{ChatMembers, InboundEvent, MemberRef, OutboundEvent};
use super::sessions::{SessionError, SessionState};
use super::ConnectionId;
use crate::error::{AppError, Entity};
use crate::state::AppState;

/// Handle one inbound text frame. `Break` means the client asked to close.
pub async fn handle_text_message(state: &AppState, conn: ConnectionId, text: &str) -> ControlFlow<()> {
    let event = match InboundEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(conn = %conn, error = %e, "Rejected inbound frame");
            reject(state, conn, AppError::Validation(e.to_string()));
            return ControlFlow::Continue(());
        }
    };

    if let InboundEvent::Disconnect = event {
        return ControlFlow::Break(());
    }

    if requires_binding(&event) && state.sessions.state(conn) != SessionState::Bound {
        tracing::debug!(conn = %conn, event = event.name(), "Relay before init-session");
        reject(state, conn, AppError::Unauthorized);
        return ControlFlow::Continue(());
    }

    if let Err(e) = route(state, conn, event).await {
        reject(state, conn, e);
    }

    ControlFlow::Continue(())
}

fn requires_binding(event: &InboundEvent) -> bool {
    !matches!(
        event,
        InboundEvent::InitSession { .. } | InboundEvent::JoinChat { .. }
    )
}

fn reject(state: &AppState, conn: ConnectionId, error: AppError) {
    state
        .dispatcher
        .reply(conn, &OutboundEvent::Error(error.body()));
}

async fn route(state: &AppState, conn: ConnectionId, event: InboundEvent) -> Result<(), AppError> {
    match event {
        InboundEvent::InitSession { user_id } => {
            state.sessions.join(conn, &user_id).map_err(|e| match e {
                SessionError::IdentityMismatch(_) => {
                    AppError::Forbidden("Cannot open a session for another user".into())
                }
                SessionError::Closed(_) => AppError::Internal(e.to_string()),
            })?;
            state.dispatcher.reply(conn, &OutboundEvent::SessionReady);
        }

        InboundEvent::JoinChat { chat_id } => {
            state
                .sessions
                .join_room(conn, &chat_id)
                .map_err(|e| AppError::Internal(e.to_string()))?;
        }

        InboundEvent::MessageSent { message_id } => {
            message_sent(state, conn, &message_id).await?;
        }

        InboundEvent::MessageDeleted { data, raw } => {
            let recipients = data.chat.ids();
            state.dispatcher.fan_out(
                recipients.iter().map(String::as_str),
                Some(data.sender_id.as_str()),
                &OutboundEvent::MessageRemoved(raw),
            );
        }

        InboundEvent::MessageUpdated { data, raw } => {
            let recipients = data.chat.ids();
            state.dispatcher.fan_out(
                recipients.iter().map(String::as_str),
                Some(data.sender.id()),
                &OutboundEvent::MessageModified(raw),
            );
        }

        InboundEvent::GroupCreated { data } => {
            let recipients = data.new_group.ids();
            state.dispatcher.fan_out(
                recipients.iter().map(String::as_str),
                Some(data.admin.id()),
                &OutboundEvent::GroupDisplayNew,
            );
        }

        InboundEvent::GroupUpdated { data, raw } => {
            let updater = data.updater.id();
            let recipients: Vec<&str> = data.updated_group.users.iter().map(MemberRef::id).collect();
            let event = OutboundEvent::GroupDisplayUpdated(raw);
            state
                .dispatcher
                .fan_out(recipients.iter().copied(), Some(updater), &event);

            // A member who was just removed is no longer in the user list.
            if let Some(removed) = &data.updated_group.removed_user {
                let removed = removed.id();
                if removed != updater && !recipients.contains(&removed) {
                    state.dispatcher.dispatch(removed, &event);
                }
            }
        }

        InboundEvent::GroupDeleted { data, raw } => {
            let recipients = data.deleted_group.ids();
            let group = raw.get("deletedGroup").cloned().unwrap_or(Value::Null);
            state.dispatcher.fan_out(
                recipients.iter().map(String::as_str),
                Some(data.admin.id()),
                &OutboundEvent::GroupDisplayRemoved(group),
            );
        }

        InboundEvent::Typing { chat, user } => {
            relay_typing(state, chat, user, true);
        }

        InboundEvent::StopTyping { chat, user } => {
            relay_typing(state, chat, user, false);
        }

        InboundEvent::Disconnect => {}
    }
    Ok(())
}

async fn message_sent(state: &AppState, conn: ConnectionId, message_id: &str) -> Result<(), AppError> {
    let message = state
        .store
        .find_message(message_id)
        .await?
        .ok_or(AppError::NotFound(Entity::Message))?;

    if state.sessions.user_of(conn).as_deref() != Some(message.sender_id.as_str()) {
        return Err(AppError::Forbidden(
            "Only the sender can announce a message".into(),
        ));
    }

    let fan_out = state.engine.on_message_created(message_id).await?;
    let mut delivered = 0;
    for recipient in fan_out.recipients {
        delivered += state.dispatcher.dispatch(
            &recipient.user_id,
            &OutboundEvent::MessageReceived {
                message: fan_out.message.clone(),
                notifications: recipient.notifications,
            },
        );
    }
    tracing::debug!(message_id = %message_id, delivered, "New message fanned out");
    Ok(())
}

/// Typing indicators with a missing chat or user are dropped silently.
fn relay_typing(state: &AppState, chat: Value, user: Value, started: bool) {
    if chat.is_null() || user.is_null() {
        return;
    }
    let (Ok(members), Ok(actor)) = (
        serde_json::from_value::<ChatMembers>(chat.clone()),
        serde_json::from_value::<MemberRef>(user.clone()),
    ) else {
        tracing::debug!("Dropped typing event with unreadable payload");
        return;
    };

    let recipients = members.ids();
    let actor = actor.id().to_string();
    let event = if started {
        OutboundEvent::TypingShown { chat, user }
    } else {
        OutboundEvent::TypingHidden { chat, user }
    };
    state
        .dispatcher
        .fan_out(recipients.iter().map(String::as_str), Some(actor.as_str()), &event);
}
