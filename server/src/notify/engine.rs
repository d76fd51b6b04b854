//! Keeps `chat.last_message` and every user's notification list in step with
//! the message timeline.
//!
//! Each store call is atomic on its own and nothing here holds a lock across
//! calls, so concurrent actions interleave at await points. The rules that
//! must hold regardless:
//! - a created message notifies every member except its sender, once;
//! - a deleted message leaves no notification reference behind;
//! - `last_message` is recomputed once per chat from post-batch state, and
//!   never during a chat teardown;
//! - edits touch neither notification lists nor `last_message`.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::{join, join_all};

use crate::attachments::AttachmentRouter;
use crate::db::models::{Attachment, Message, MessageView};
use crate::error::{AppError, AppResult, Entity};
use crate::store::{ChatPatch, ChatStore, MessagePatch, NewMessage};

/// A recipient's notification list after a message was created.
#[derive(Debug, Clone)]
pub struct RecipientNotifications {
    pub user_id: String,
    pub notifications: Vec<MessageView>,
}

#[derive(Debug, Clone)]
pub struct CreatedFanOut {
    pub message: MessageView,
    pub recipients: Vec<RecipientNotifications>,
}

/// How an edit treats the existing attachment.
#[derive(Debug, Clone)]
pub enum AttachmentChange {
    Keep,
    Remove,
    Replace(Attachment),
}

#[derive(Debug, Clone)]
pub struct MessageEdit {
    pub content: String,
    pub attachment: AttachmentChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessageChange {
    pub chat_id: String,
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub deleted: Vec<Message>,
    /// Users whose notification lists lost at least one reference.
    pub purged_from: Vec<String>,
    pub last_messages: Vec<LastMessageChange>,
}

#[derive(Clone)]
pub struct NotificationEngine {
    store: Arc<dyn ChatStore>,
    attachments: AttachmentRouter,
}

impl NotificationEngine {
    pub fn new(store: Arc<dyn ChatStore>, attachments: AttachmentRouter) -> Self {
        Self { store, attachments }
    }

    /// Persist a new message and point its chat's `last_message` at it.
    pub async fn record_message(&self, new: NewMessage) -> AppResult<MessageView> {
        if new.content.trim().is_empty() && new.attachment.is_none() {
            return Err(AppError::Validation(
                "A message needs text content or an attachment".into(),
            ));
        }

        let chat = self
            .store
            .find_chat(&new.chat_id)
            .await?
            .ok_or(AppError::NotFound(Entity::Chat))?;
        if !chat.has_member(&new.sender_id) {
            return Err(AppError::Forbidden("You are not a member of this chat".into()));
        }

        let created = self.store.create_message(new).await?;

        let (updated_chat, views) = join(
            self.store
                .update_chat(&chat.id, ChatPatch::last_message(Some(created.id.clone()))),
            self.store.message_views(vec![created.id.clone()]),
        )
        .await;

        let failure = match updated_chat {
            Ok(Some(_)) => None,
            Ok(None) => Some(AppError::NotFound(Entity::Chat)),
            Err(e) => Some(AppError::from(e)),
        };
        if let Some(err) = failure {
            // The chat vanished or could not be updated: the message must not outlive it.
            if let Err(e) = self.store.delete_message(&created.id).await {
                tracing::warn!(message_id = %created.id, error = %e, "Failed to remove orphaned message");
            }
            return Err(err);
        }
        let view = views?
            .into_iter()
            .next()
            .ok_or(AppError::NotFound(Entity::Message))?;

        tracing::debug!(message_id = %created.id, chat_id = %chat.id, "Message recorded");
        Ok(view)
    }

    /// Append the message to every member's notification list except the
    /// sender's. Returns each recipient's updated, populated list.
    pub async fn on_message_created(&self, message_id: &str) -> AppResult<CreatedFanOut> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or(AppError::NotFound(Entity::Message))?;
        let chat = self
            .store
            .find_chat(&message.chat_id)
            .await?
            .ok_or(AppError::NotFound(Entity::Chat))?;

        let recipients: Vec<&String> = chat
            .members
            .iter()
            .filter(|member| **member != message.sender_id)
            .collect();

        let pushes = join_all(
            recipients
                .iter()
                .map(|user_id| self.notify_recipient(user_id, &message.id)),
        )
        .await;

        let mut out = Vec::with_capacity(pushes.len());
        for push in pushes {
            if let Some(recipient) = push? {
                out.push(recipient);
            }
        }

        let view = self
            .store
            .message_views(vec![message.id.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::NotFound(Entity::Message))?;

        tracing::debug!(
            message_id = %message.id,
            chat_id = %chat.id,
            recipients = out.len(),
            "Notifications appended"
        );

        Ok(CreatedFanOut {
            message: view,
            recipients: out,
        })
    }

    async fn notify_recipient(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> AppResult<Option<RecipientNotifications>> {
        let Some(list) = self.store.push_notification(user_id, message_id).await? else {
            tracing::warn!(user_id = %user_id, "Chat member no longer exists, no notification");
            return Ok(None);
        };
        let notifications = self.store.message_views(list).await?;
        Ok(Some(RecipientNotifications {
            user_id: user_id.to_string(),
            notifications,
        }))
    }

    /// Replace a message's content and attachment. A replacement attachment
    /// must already be stored; it is released again if the edit is not persisted.
    pub async fn on_message_edited(
        &self,
        message_id: &str,
        editor_id: &str,
        edit: MessageEdit,
    ) -> AppResult<MessageView> {
        let persisted = match self.prepare_edit(message_id, editor_id, &edit).await {
            Ok((patch, released)) => match self.store.update_message(message_id, patch).await {
                Ok(Some(_)) => Ok(released),
                Ok(None) => Err(AppError::NotFound(Entity::Message)),
                Err(e) => Err(AppError::from(e)),
            },
            Err(e) => Err(e),
        };

        let released = match persisted {
            Ok(released) => released,
            Err(e) => {
                if let AttachmentChange::Replace(fresh) = &edit.attachment {
                    self.attachments.release_logged(fresh).await;
                }
                return Err(e);
            }
        };

        if let Some(old) = released {
            self.attachments.release_logged(&old).await;
        }

        self.store
            .message_views(vec![message_id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::NotFound(Entity::Message))
    }

    /// Validate an edit and build its patch, plus the attachment it displaces.
    async fn prepare_edit(
        &self,
        message_id: &str,
        editor_id: &str,
        edit: &MessageEdit,
    ) -> AppResult<(MessagePatch, Option<Attachment>)> {
        let existing = self
            .store
            .find_message(message_id)
            .await?
            .ok_or(AppError::NotFound(Entity::Message))?;
        if existing.sender_id != editor_id {
            return Err(AppError::Forbidden("Only the sender can edit a message".into()));
        }

        let (attachment, released) = match &edit.attachment {
            AttachmentChange::Keep => (existing.attachment, None),
            AttachmentChange::Remove => (None, existing.attachment),
            AttachmentChange::Replace(fresh) => (Some(fresh.clone()), existing.attachment),
        };

        if edit.content.trim().is_empty() && attachment.is_none() {
            return Err(AppError::Validation(
                "A message must keep a file or some text content".into(),
            ));
        }

        Ok((
            MessagePatch {
                content: edit.content.clone(),
                attachment,
            },
            released,
        ))
    }

    /// Delete a batch of messages. Ids that no longer exist are skipped.
    ///
    /// With `teardown` set (the whole chat is going away) `last_message` is
    /// left alone.
    pub async fn on_message_deleted(
        &self,
        message_ids: &[String],
        teardown: bool,
    ) -> AppResult<DeleteOutcome> {
        let unique: BTreeSet<&String> = message_ids.iter().collect();

        let results = join_all(unique.into_iter().map(|id| self.delete_one(id))).await;
        let mut deleted = Vec::new();
        for result in results {
            if let Some(message) = result? {
                deleted.push(message);
            }
        }
        if deleted.is_empty() {
            return Ok(DeleteOutcome::default());
        }

        let deleted_ids: Vec<String> = deleted.iter().map(|m| m.id.clone()).collect();
        let purged_from = self.store.purge_notifications(deleted_ids.clone()).await?;

        let mut last_messages = Vec::new();
        if !teardown {
            let chats: BTreeSet<&str> = deleted.iter().map(|m| m.chat_id.as_str()).collect();
            for chat_id in chats {
                if let Some(change) = self.recompute_last_message(chat_id, &deleted_ids).await? {
                    last_messages.push(change);
                }
            }
        }

        tracing::info!(
            deleted = deleted.len(),
            purged_users = purged_from.len(),
            teardown = teardown,
            "Messages deleted"
        );

        Ok(DeleteOutcome {
            deleted,
            purged_from,
            last_messages,
        })
    }

    async fn delete_one(&self, message_id: &str) -> AppResult<Option<Message>> {
        let Some(existing) = self.store.find_message(message_id).await? else {
            tracing::debug!(message_id = %message_id, "Message already deleted");
            return Ok(None);
        };

        let release = async {
            if let Some(attachment) = &existing.attachment {
                self.attachments.release_logged(attachment).await;
            }
        };
        let ((), deleted) = join(release, self.store.delete_message(message_id)).await;
        Ok(deleted?)
    }

    async fn recompute_last_message(
        &self,
        chat_id: &str,
        deleted_ids: &[String],
    ) -> AppResult<Option<LastMessageChange>> {
        let Some(chat) = self.store.find_chat(chat_id).await? else {
            return Ok(None);
        };
        let pointed_at_deleted = chat
            .last_message
            .as_ref()
            .is_some_and(|id| deleted_ids.contains(id));
        if !pointed_at_deleted {
            return Ok(None);
        }

        let next = self.store.latest_message(chat_id).await?.map(|m| m.id);
        if self
            .store
            .update_chat(chat_id, ChatPatch::last_message(next.clone()))
            .await?
            .is_none()
        {
            return Ok(None);
        }

        Ok(Some(LastMessageChange {
            chat_id: chat_id.to_string(),
            last_message: next,
        }))
    }

    /// Membership changes leave notification lists untouched: removed users
    /// keep their references, added users get none for earlier messages.
    pub fn on_membership_changed(&self, chat_id: &str, added: &[String], removed: &[String]) {
        tracing::info!(
            chat_id = %chat_id,
            added = added.len(),
            removed = removed.len(),
            "Chat membership changed"
        );
    }

    pub async fn notifications_for(&self, user_id: &str) -> AppResult<Vec<MessageView>> {
        let list = self
            .store
            .notifications(user_id)
            .await?
            .ok_or(AppError::NotFound(Entity::User))?;
        Ok(self.store.message_views(list).await?)
    }

    /// Remove a batch of references from one user's list.
    pub async fn dismiss_notifications(
        &self,
        user_id: &str,
        message_ids: Vec<String>,
    ) -> AppResult<Vec<MessageView>> {
        if message_ids.is_empty() {
            return Err(AppError::Validation("No notifications to dismiss".into()));
        }
        let list = self
            .store
            .pull_notifications(user_id, message_ids)
            .await?
            .ok_or(AppError::NotFound(Entity::User))?;
        Ok(self.store.message_views(list).await?)
    }
}
