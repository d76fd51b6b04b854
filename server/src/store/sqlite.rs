//! SQLite implementation of [`ChatStore`].
//!
//! rusqlite is synchronous, so each operation takes the connection lock
//! inside `spawn_blocking` and runs to completion there.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    BoxFuture, ChatPatch, ChatStore, MessagePatch, NewChat, NewMessage, NewUser, StoreError,
    StoreResult, UserPatch,
};
use crate::db::models::{
    Attachment, Chat, ChatKind, ChatSummary, ChatView, DisplayPicture, Message, MessageView, User,
    UserSummary,
};
use crate::db::DbPool;

const USER_COLUMNS: &str =
    "id, name, email, password_hash, profile_pic_url, profile_pic_key, created_at, updated_at";
const CHAT_COLUMNS: &str =
    "id, name, is_group, last_message_id, picture_url, picture_key, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, sender_id, chat_id, content, attachment, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {}", e)))?
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// --- row mapping ---

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        profile_pic: DisplayPicture {
            url: row.get(4)?,
            key: row.get(5)?,
        },
        notifications: Vec::new(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let is_group: bool = row.get(2)?;
    Ok(Chat {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: if is_group {
            ChatKind::Group
        } else {
            ChatKind::Direct
        },
        members: Vec::new(),
        admins: Vec::new(),
        last_message: row.get(3)?,
        picture: DisplayPicture {
            url: row.get(4)?,
            key: row.get(5)?,
        },
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let attachment = match row.get::<_, Option<String>>(4)? {
        Some(raw) => Some(serde_json::from_str::<Attachment>(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        chat_id: row.get(2)?,
        content: row.get(3)?,
        attachment,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn encode_attachment(attachment: &Option<Attachment>) -> rusqlite::Result<Option<String>> {
    attachment
        .as_ref()
        .map(|a| {
            serde_json::to_string(a).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        })
        .transpose()
}

// --- loaders (run with the lock held) ---

fn string_column(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn user_exists(conn: &Connection, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

fn load_notifications(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    string_column(
        conn,
        "SELECT message_id FROM user_notifications WHERE user_id = ?1 ORDER BY seq",
        user_id,
    )
}

fn load_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![user_id],
            user_from_row,
        )
        .optional()?;
    match user {
        Some(mut user) => {
            user.notifications = load_notifications(conn, user_id)?;
            Ok(Some(user))
        }
        None => Ok(None),
    }
}

fn load_summary(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserSummary>> {
    conn.query_row(
        "SELECT id, name, email, profile_pic_url FROM users WHERE id = ?1",
        params![user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                profile_pic: row.get(3)?,
            })
        },
    )
    .optional()
}

fn load_summaries(conn: &Connection, user_ids: &[String]) -> rusqlite::Result<Vec<UserSummary>> {
    let mut out = Vec::with_capacity(user_ids.len());
    for id in user_ids {
        if let Some(summary) = load_summary(conn, id)? {
            out.push(summary);
        }
    }
    Ok(out)
}

fn load_chat(conn: &Connection, chat_id: &str) -> rusqlite::Result<Option<Chat>> {
    let chat = conn
        .query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            params![chat_id],
            chat_from_row,
        )
        .optional()?;
    match chat {
        Some(mut chat) => {
            chat.members = string_column(
                conn,
                "SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY position",
                chat_id,
            )?;
            chat.admins = string_column(
                conn,
                "SELECT user_id FROM chat_admins WHERE chat_id = ?1 ORDER BY rowid",
                chat_id,
            )?;
            Ok(Some(chat))
        }
        None => Ok(None),
    }
}

fn load_message(conn: &Connection, message_id: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![message_id],
        message_from_row,
    )
    .optional()
}

fn view_message(conn: &Connection, message: Message) -> rusqlite::Result<Option<MessageView>> {
    let Some(sender) = load_summary(conn, &message.sender_id)? else {
        tracing::warn!(
            message_id = %message.id,
            sender_id = %message.sender_id,
            "Message sender no longer exists, skipping"
        );
        return Ok(None);
    };
    let chat = load_chat(conn, &message.chat_id)?.map(|c| ChatSummary::from(&c));
    Ok(Some(MessageView {
        id: message.id,
        sender,
        chat,
        content: message.content,
        attachment: message.attachment,
        created_at: message.created_at,
        updated_at: message.updated_at,
    }))
}

fn view_chat(conn: &Connection, chat: Chat) -> rusqlite::Result<ChatView> {
    let last_message = match chat.last_message.as_deref() {
        Some(id) => match load_message(conn, id)? {
            Some(message) => view_message(conn, message)?,
            None => None,
        },
        None => None,
    };
    Ok(ChatView {
        users: load_summaries(conn, &chat.members)?,
        admins: load_summaries(conn, &chat.admins)?,
        id: chat.id,
        name: chat.name,
        kind: chat.kind,
        last_message,
        picture: chat.picture,
        created_at: chat.created_at,
        updated_at: chat.updated_at,
    })
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

impl ChatStore for SqliteStore {
    fn create_user(&self, user: NewUser) -> BoxFuture<'_, StoreResult<User>> {
        Box::pin(self.run(move |conn| {
            let taken: bool = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                params![user.email],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )?;
            if taken {
                return Err(StoreError::Conflict(format!(
                    "email {} is already registered",
                    user.email
                )));
            }

            let id = Uuid::now_v7().to_string();
            let now = now_millis();
            conn.execute(
                "INSERT INTO users (id, name, email, password_hash, profile_pic_url, profile_pic_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id,
                    user.name,
                    user.email,
                    user.password_hash,
                    user.profile_pic.url,
                    user.profile_pic.key,
                    now
                ],
            )?;

            Ok(User {
                id,
                name: user.name,
                email: user.email,
                password_hash: user.password_hash,
                profile_pic: user.profile_pic,
                notifications: Vec::new(),
                created_at: now,
                updated_at: now,
            })
        }))
    }

    fn find_user(&self, user_id: &str) -> BoxFuture<'_, StoreResult<Option<User>>> {
        let user_id = user_id.to_owned();
        Box::pin(self.run(move |conn| Ok(load_user(conn, &user_id)?)))
    }

    fn update_user(
        &self,
        user_id: &str,
        patch: UserPatch,
    ) -> BoxFuture<'_, StoreResult<Option<User>>> {
        let user_id = user_id.to_owned();
        Box::pin(self.run(move |conn| {
            let tx = conn.transaction()?;
            if !user_exists(&tx, &user_id)? {
                return Ok(None);
            }
            if let Some(name) = &patch.name {
                tx.execute(
                    "UPDATE users SET name = ?2 WHERE id = ?1",
                    params![user_id, name],
                )?;
            }
            if let Some(picture) = &patch.profile_pic {
                tx.execute(
                    "UPDATE users SET profile_pic_url = ?2, profile_pic_key = ?3 WHERE id = ?1",
                    params![user_id, picture.url, picture.key],
                )?;
            }
            tx.execute(
                "UPDATE users SET updated_at = ?2 WHERE id = ?1",
                params![user_id, now_millis()],
            )?;
            tx.commit()?;
            Ok(load_user(conn, &user_id)?)
        }))
    }

    fn search_users(
        &self,
        query: &str,
        exclude: &str,
    ) -> BoxFuture<'_, StoreResult<Vec<UserSummary>>> {
        let query = query.to_lowercase();
        let exclude = exclude.to_owned();
        Box::pin(self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, email, profile_pic_url FROM users
                 WHERE id != ?2
                   AND (instr(lower(name), ?1) > 0 OR instr(lower(email), ?1) > 0)
                 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![query, exclude], |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    profile_pic: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        }))
    }

    fn create_chat(&self, chat: NewChat) -> BoxFuture<'_, StoreResult<Chat>> {
        Box::pin(self.run(move |conn| {
            let id = Uuid::now_v7().to_string();
            let now = now_millis();
            let members = dedup_preserving_order(chat.members);
            let admins = dedup_preserving_order(chat.admins);

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chats (id, name, is_group, last_message_id, picture_url, picture_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    chat.name,
                    chat.kind == ChatKind::Group,
                    chat.picture.url,
                    chat.picture.key,
                    now
                ],
            )?;
            for (position, user_id) in members.iter().enumerate() {
                tx.execute(
                    "INSERT INTO chat_members (chat_id, user_id, position) VALUES (?1, ?2, ?3)",
                    params![id, user_id, position as i64],
                )?;
            }
            for user_id in &admins {
                tx.execute(
                    "INSERT INTO chat_admins (chat_id, user_id) VALUES (?1, ?2)",
                    params![id, user_id],
                )?;
            }
            tx.commit()?;

            Ok(Chat {
                id,
                name: chat.name,
                kind: chat.kind,
                members,
                admins,
                last_message: None,
                picture: chat.picture,
                created_at: now,
                updated_at: now,
            })
        }))
    }

    fn find_chat(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<Chat>>> {
        let chat_id = chat_id.to_owned();
        Box::pin(self.run(move |conn| Ok(load_chat(conn, &chat_id)?)))
    }

    fn find_direct_chat(&self, a: &str, b: &str) -> BoxFuture<'_, StoreResult<Option<Chat>>> {
        let (a, b) = (a.to_owned(), b.to_owned());
        Box::pin(self.run(move |conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT c.id FROM chats c
                     WHERE c.is_group = 0
                       AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = ?1)
                       AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = ?2)
                       AND (SELECT COUNT(*) FROM chat_members m WHERE m.chat_id = c.id) = 2
                     ORDER BY c.created_at
                     LIMIT 1",
                    params![a, b],
                    |row| row.get(0),
                )
                .optional()?;
            match id {
                Some(id) => Ok(load_chat(conn, &id)?),
                None => Ok(None),
            }
        }))
    }

    fn update_chat(
        &self,
        chat_id: &str,
        patch: ChatPatch,
    ) -> BoxFuture<'_, StoreResult<Option<Chat>>> {
        let chat_id = chat_id.to_owned();
        Box::pin(self.run(move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT COUNT(*) FROM chats WHERE id = ?1",
                params![chat_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )?;
            if !exists {
                return Ok(None);
            }

            if let Some(name) = &patch.name {
                tx.execute(
                    "UPDATE chats SET name = ?2 WHERE id = ?1",
                    params![chat_id, name],
                )?;
            }
            if let Some(picture) = &patch.picture {
                tx.execute(
                    "UPDATE chats SET picture_url = ?2, picture_key = ?3 WHERE id = ?1",
                    params![chat_id, picture.url, picture.key],
                )?;
            }
            if let Some(last_message) = &patch.last_message {
                tx.execute(
                    "UPDATE chats SET last_message_id = ?2 WHERE id = ?1",
                    params![chat_id, last_message],
                )?;
            }
            for user_id in &patch.add_members {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_members (chat_id, user_id, position)
                     VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1 FROM chat_members WHERE chat_id = ?1))",
                    params![chat_id, user_id],
                )?;
            }
            // Admins stay a subset of members.
            for user_id in &patch.remove_members {
                tx.execute(
                    "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                )?;
                tx.execute(
                    "DELETE FROM chat_admins WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                )?;
            }
            for user_id in &patch.add_admins {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_admins (chat_id, user_id)
                     SELECT ?1, ?2 WHERE EXISTS
                       (SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2)",
                    params![chat_id, user_id],
                )?;
            }
            for user_id in &patch.remove_admins {
                tx.execute(
                    "DELETE FROM chat_admins WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                )?;
            }

            tx.execute(
                "UPDATE chats SET updated_at = MAX(updated_at + 1, ?2) WHERE id = ?1",
                params![chat_id, now_millis()],
            )?;
            tx.commit()?;

            Ok(load_chat(conn, &chat_id)?)
        }))
    }

    fn delete_chat(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<Chat>>> {
        let chat_id = chat_id.to_owned();
        Box::pin(self.run(move |conn| {
            let Some(chat) = load_chat(conn, &chat_id)? else {
                return Ok(None);
            };
            conn.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
            Ok(Some(chat))
        }))
    }

    fn chat_view(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<ChatView>>> {
        let chat_id = chat_id.to_owned();
        Box::pin(self.run(move |conn| match load_chat(conn, &chat_id)? {
            Some(chat) => Ok(Some(view_chat(conn, chat)?)),
            None => Ok(None),
        }))
    }

    fn chats_for_user(&self, user_id: &str) -> BoxFuture<'_, StoreResult<Vec<ChatView>>> {
        let user_id = user_id.to_owned();
        Box::pin(self.run(move |conn| {
            let ids = string_column(
                conn,
                "SELECT c.id FROM chats c
                 JOIN chat_members m ON m.chat_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.updated_at DESC, c.rowid DESC",
                &user_id,
            )?;
            let mut views = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(chat) = load_chat(conn, &id)? {
                    views.push(view_chat(conn, chat)?);
                }
            }
            Ok(views)
        }))
    }

    fn create_message(&self, message: NewMessage) -> BoxFuture<'_, StoreResult<Message>> {
        Box::pin(self.run(move |conn| {
            let id = Uuid::now_v7().to_string();
            let now = now_millis();
            let attachment = encode_attachment(&message.attachment)?;
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, content, attachment, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    message.chat_id,
                    message.sender_id,
                    message.content,
                    attachment,
                    now
                ],
            )?;
            Ok(Message {
                id,
                sender_id: message.sender_id,
                chat_id: message.chat_id,
                content: message.content,
                attachment: message.attachment,
                created_at: now,
                updated_at: now,
            })
        }))
    }

    fn find_message(&self, message_id: &str) -> BoxFuture<'_, StoreResult<Option<Message>>> {
        let message_id = message_id.to_owned();
        Box::pin(self.run(move |conn| Ok(load_message(conn, &message_id)?)))
    }

    fn update_message(
        &self,
        message_id: &str,
        patch: MessagePatch,
    ) -> BoxFuture<'_, StoreResult<Option<Message>>> {
        let message_id = message_id.to_owned();
        Box::pin(self.run(move |conn| {
            let attachment = encode_attachment(&patch.attachment)?;
            let changed = conn.execute(
                "UPDATE messages SET content = ?2, attachment = ?3, updated_at = ?4 WHERE id = ?1",
                params![message_id, patch.content, attachment, now_millis()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(load_message(conn, &message_id)?)
        }))
    }

    fn delete_message(&self, message_id: &str) -> BoxFuture<'_, StoreResult<Option<Message>>> {
        let message_id = message_id.to_owned();
        Box::pin(self.run(move |conn| {
            let Some(message) = load_message(conn, &message_id)? else {
                return Ok(None);
            };
            conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
            Ok(Some(message))
        }))
    }

    fn latest_message(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Option<Message>>> {
        let chat_id = chat_id.to_owned();
        Box::pin(self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1
                         ORDER BY created_at DESC, seq DESC LIMIT 1"
                    ),
                    params![chat_id],
                    message_from_row,
                )
                .optional()?)
        }))
    }

    fn chat_message_ids(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Vec<String>>> {
        let chat_id = chat_id.to_owned();
        Box::pin(self.run(move |conn| {
            Ok(string_column(
                conn,
                "SELECT id FROM messages WHERE chat_id = ?1 ORDER BY created_at, seq",
                &chat_id,
            )?)
        }))
    }

    fn message_views(&self, ids: Vec<String>) -> BoxFuture<'_, StoreResult<Vec<MessageView>>> {
        Box::pin(self.run(move |conn| {
            let mut views = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(message) = load_message(conn, id)? {
                    if let Some(view) = view_message(conn, message)? {
                        views.push(view);
                    }
                }
            }
            Ok(views)
        }))
    }

    fn chat_messages(&self, chat_id: &str) -> BoxFuture<'_, StoreResult<Vec<MessageView>>> {
        let chat_id = chat_id.to_owned();
        Box::pin(self.run(move |conn| {
            let messages = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1
                     ORDER BY created_at DESC, seq DESC"
                ))?;
                let rows = stmt.query_map(params![chat_id], message_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            let mut views = Vec::with_capacity(messages.len());
            for message in messages {
                if let Some(view) = view_message(conn, message)? {
                    views.push(view);
                }
            }
            Ok(views)
        }))
    }

    fn push_notification(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> BoxFuture<'_, StoreResult<Option<Vec<String>>>> {
        let (user_id, message_id) = (user_id.to_owned(), message_id.to_owned());
        Box::pin(self.run(move |conn| {
            if !user_exists(conn, &user_id)? {
                return Ok(None);
            }
            conn.execute(
                "INSERT INTO user_notifications (user_id, message_id)
                 SELECT ?1, ?2 WHERE NOT EXISTS (
                     SELECT 1 FROM user_notifications WHERE user_id = ?1 AND message_id = ?2
                 )",
                params![user_id, message_id],
            )?;
            Ok(Some(load_notifications(conn, &user_id)?))
        }))
    }

    fn pull_notifications(
        &self,
        user_id: &str,
        message_ids: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<Option<Vec<String>>>> {
        let user_id = user_id.to_owned();
        Box::pin(self.run(move |conn| {
            if !user_exists(conn, &user_id)? {
                return Ok(None);
            }
            let tx = conn.transaction()?;
            for message_id in &message_ids {
                tx.execute(
                    "DELETE FROM user_notifications WHERE user_id = ?1 AND message_id = ?2",
                    params![user_id, message_id],
                )?;
            }
            tx.commit()?;
            Ok(Some(load_notifications(conn, &user_id)?))
        }))
    }

    fn purge_notifications(
        &self,
        message_ids: Vec<String>,
    ) -> BoxFuture<'_, StoreResult<Vec<String>>> {
        Box::pin(self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut affected = BTreeSet::new();
            for message_id in &message_ids {
                affected.extend(string_column(
                    &tx,
                    "SELECT DISTINCT user_id FROM user_notifications WHERE message_id = ?1",
                    message_id,
                )?);
                tx.execute(
                    "DELETE FROM user_notifications WHERE message_id = ?1",
                    params![message_id],
                )?;
            }
            tx.commit()?;
            Ok(affected.into_iter().collect())
        }))
    }

    fn notifications(&self, user_id: &str) -> BoxFuture<'_, StoreResult<Option<Vec<String>>>> {
        let user_id = user_id.to_owned();
        Box::pin(self.run(move |conn| {
            if !user_exists(conn, &user_id)? {
                return Ok(None);
            }
            Ok(Some(load_notifications(conn, &user_id)?))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn store() -> SqliteStore {
        SqliteStore::new(init_memory_db().unwrap())
    }

    async fn user(store: &SqliteStore, name: &str) -> User {
        store
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                password_hash: "hash".to_string(),
                profile_pic: DisplayPicture::default_with_url("/static/user.png"),
            })
            .await
            .unwrap()
    }

    async fn direct(store: &SqliteStore, a: &str, b: &str) -> Chat {
        store
            .create_chat(NewChat {
                name: "sender".to_string(),
                kind: ChatKind::Direct,
                members: vec![a.to_string(), b.to_string()],
                admins: vec![],
                picture: DisplayPicture::default_with_url("/static/group.png"),
            })
            .await
            .unwrap()
    }

    async fn text(store: &SqliteStore, sender: &str, chat: &str, content: &str) -> Message {
        store
            .create_message(NewMessage {
                sender_id: sender.to_string(),
                chat_id: chat.to_string(),
                content: content.to_string(),
                attachment: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let store = store();
        user(&store, "Alice").await;
        let err = store
            .create_user(NewUser {
                name: "Other".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: "x".to_string(),
                profile_pic: DisplayPicture::default_with_url("/static/user.png"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_user_patches_only_given_fields() {
        let store = store();
        let a = user(&store, "Alice").await;

        let renamed = store
            .update_user(
                &a.id,
                UserPatch {
                    name: Some("Alicia".to_string()),
                    ..UserPatch::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Alicia");
        assert_eq!(renamed.profile_pic, a.profile_pic);

        let picture = DisplayPicture {
            url: "/media/images/a.png".to_string(),
            key: Some("a.png".to_string()),
        };
        let updated = store
            .update_user(
                &a.id,
                UserPatch {
                    profile_pic: Some(picture.clone()),
                    ..UserPatch::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Alicia");
        assert_eq!(updated.profile_pic, picture);

        assert!(store
            .update_user("ghost", UserPatch::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_direct_chat_either_order() {
        let store = store();
        let a = user(&store, "Alice").await;
        let b = user(&store, "Bob").await;
        let c = user(&store, "Carol").await;
        let chat = direct(&store, &a.id, &b.id).await;

        let found = store.find_direct_chat(&b.id, &a.id).await.unwrap().unwrap();
        assert_eq!(found.id, chat.id);
        assert!(store.find_direct_chat(&a.id, &c.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_message_ties_go_to_later_insert() {
        let store = store();
        let a = user(&store, "Alice").await;
        let b = user(&store, "Bob").await;
        let chat = direct(&store, &a.id, &b.id).await;

        let _m1 = text(&store, &a.id, &chat.id, "first").await;
        let m2 = text(&store, &a.id, &chat.id, "second").await;

        let latest = store.latest_message(&chat.id).await.unwrap().unwrap();
        assert_eq!(latest.id, m2.id);

        let history = store.chat_messages(&chat.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, m2.id);
        assert_eq!(history[0].sender.name, "Alice");
        assert_eq!(history[0].chat.as_ref().unwrap().users.len(), 2);
    }

    #[tokio::test]
    async fn test_notifications_keep_insertion_order_without_duplicates() {
        let store = store();
        let a = user(&store, "Alice").await;

        store.push_notification(&a.id, "m1").await.unwrap();
        store.push_notification(&a.id, "m2").await.unwrap();
        let list = store.push_notification(&a.id, "m1").await.unwrap().unwrap();
        assert_eq!(list, vec!["m1", "m2"]);

        let list = store
            .pull_notifications(&a.id, vec!["m1".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(list, vec!["m2"]);

        assert!(store.push_notification("ghost", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_notifications_reports_affected_users() {
        let store = store();
        let a = user(&store, "Alice").await;
        let b = user(&store, "Bob").await;
        store.push_notification(&a.id, "m1").await.unwrap();
        store.push_notification(&b.id, "m1").await.unwrap();
        store.push_notification(&b.id, "m2").await.unwrap();

        let affected = store.purge_notifications(vec!["m1".to_string()]).await.unwrap();
        assert_eq!(affected.len(), 2);
        assert!(store.notifications(&a.id).await.unwrap().unwrap().is_empty());
        assert_eq!(store.notifications(&b.id).await.unwrap().unwrap(), vec!["m2"]);
    }

    #[tokio::test]
    async fn test_removing_member_drops_admin_role() {
        let store = store();
        let a = user(&store, "Alice").await;
        let b = user(&store, "Bob").await;
        let chat = store
            .create_chat(NewChat {
                name: "team".to_string(),
                kind: ChatKind::Group,
                members: vec![a.id.clone(), b.id.clone()],
                admins: vec![a.id.clone(), b.id.clone()],
                picture: DisplayPicture::default_with_url("/static/group.png"),
            })
            .await
            .unwrap();

        let updated = store
            .update_chat(
                &chat.id,
                ChatPatch {
                    remove_members: vec![b.id.clone()],
                    ..ChatPatch::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.members, vec![a.id.clone()]);
        assert_eq!(updated.admins, vec![a.id.clone()]);
        assert!(updated.updated_at > chat.updated_at);
    }

    #[tokio::test]
    async fn test_delete_chat_keeps_messages() {
        let store = store();
        let a = user(&store, "Alice").await;
        let b = user(&store, "Bob").await;
        let chat = direct(&store, &a.id, &b.id).await;
        let m = text(&store, &a.id, &chat.id, "hi").await;

        assert!(store.delete_chat(&chat.id).await.unwrap().is_some());
        assert!(store.find_chat(&chat.id).await.unwrap().is_none());

        let views = store.message_views(vec![m.id.clone()]).await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].chat.is_none());
    }
}
