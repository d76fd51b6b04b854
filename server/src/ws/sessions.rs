//! Connection/session registry.
//!
//! Every live socket gets a [`ConnectionId`] on connect, together with the
//! user its access token verified. A connection starts `Connected`, becomes
//! `Bound` once it names that user, and is `Closed` for good after
//! [`SessionRegistry::leave`].
//!
//! Lock order is sessions then rooms; nothing takes them the other way round.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;

use super::rooms::{Address, RoomRegistry};
use super::{ConnectionId, ConnectionSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Bound,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("connection {0} is authenticated as another user")]
    IdentityMismatch(ConnectionId),
}

struct Session {
    sender: ConnectionSender,
    /// User verified at upgrade; the only user this connection may bind.
    identity: String,
    user: Option<String>,
    chats: HashSet<String>,
}

pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: DashMap<ConnectionId, Session>,
    rooms: RoomRegistry,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: DashMap::new(),
            rooms: RoomRegistry::new(),
        }
    }

    pub fn connect(&self, sender: ConnectionSender, identity: impl Into<String>) -> ConnectionId {
        let conn = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(
            conn,
            Session {
                sender,
                identity: identity.into(),
                user: None,
                chats: HashSet::new(),
            },
        );
        tracing::debug!(conn = %conn, "Connection registered");
        conn
    }

    /// Bind the connection to `user_id`, which must be its verified identity.
    /// Binding again is a no-op.
    pub fn join(&self, conn: ConnectionId, user_id: &str) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(&conn)
            .ok_or(SessionError::Closed(conn))?;

        if session.identity != user_id {
            tracing::warn!(
                conn = %conn,
                identity = %session.identity,
                user_id = %user_id,
                "Rejected init-session for another user"
            );
            return Err(SessionError::IdentityMismatch(conn));
        }
        if session.user.is_some() {
            return Ok(());
        }
        session.user = Some(user_id.to_string());
        self.rooms.join(Address::User(user_id.to_string()), conn);

        tracing::debug!(conn = %conn, user_id = %user_id, "Connection bound");
        Ok(())
    }

    pub fn join_room(&self, conn: ConnectionId, chat_id: &str) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(&conn)
            .ok_or(SessionError::Closed(conn))?;
        session.chats.insert(chat_id.to_string());
        self.rooms.join(Address::Chat(chat_id.to_string()), conn);
        tracing::debug!(conn = %conn, chat_id = %chat_id, "Connection joined chat room");
        Ok(())
    }

    /// Drop every binding of the connection. Returns the user it was bound to.
    pub fn leave(&self, conn: ConnectionId) -> Option<String> {
        let (_, session) = self.sessions.remove(&conn)?;
        if let Some(user) = &session.user {
            self.rooms.leave(&Address::User(user.clone()), conn);
        }
        for chat in &session.chats {
            self.rooms.leave(&Address::Chat(chat.clone()), conn);
        }
        tracing::debug!(conn = %conn, user_id = ?session.user, "Connection unregistered");
        session.user
    }

    pub fn state(&self, conn: ConnectionId) -> SessionState {
        match self.sessions.get(&conn) {
            Some(session) if session.user.is_some() => SessionState::Bound,
            Some(_) => SessionState::Connected,
            None => SessionState::Closed,
        }
    }

    pub fn user_of(&self, conn: ConnectionId) -> Option<String> {
        self.sessions.get(&conn).and_then(|s| s.user.clone())
    }

    pub fn sender(&self, conn: ConnectionId) -> Option<ConnectionSender> {
        self.sessions.get(&conn).map(|s| s.sender.clone())
    }

    /// Senders of every live connection joined to `address`.
    pub fn senders_for(&self, address: &Address) -> Vec<ConnectionSender> {
        self.rooms
            .members(address)
            .into_iter()
            .filter_map(|conn| self.sender(conn))
            .collect()
    }

    pub fn connections_for_user(&self, user_id: &str) -> usize {
        self.rooms.members(&Address::User(user_id.to_string())).len()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connect(registry: &SessionRegistry) -> ConnectionId {
        connect_as(registry, "alice")
    }

    fn connect_as(registry: &SessionRegistry, identity: &str) -> ConnectionId {
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.connect(tx, identity)
    }

    #[test]
    fn test_lifecycle_connected_bound_closed() {
        let registry = SessionRegistry::new();
        let conn = connect(&registry);
        assert_eq!(registry.state(conn), SessionState::Connected);

        registry.join(conn, "alice").unwrap();
        assert_eq!(registry.state(conn), SessionState::Bound);
        assert_eq!(registry.connections_for_user("alice"), 1);

        assert_eq!(registry.leave(conn), Some("alice".to_string()));
        assert_eq!(registry.state(conn), SessionState::Closed);
        assert_eq!(registry.connections_for_user("alice"), 0);

        assert_eq!(registry.join(conn, "alice"), Err(SessionError::Closed(conn)));
        assert_eq!(registry.join_room(conn, "c1"), Err(SessionError::Closed(conn)));
    }

    #[test]
    fn test_many_connections_per_user() {
        let registry = SessionRegistry::new();
        let a = connect(&registry);
        let b = connect(&registry);
        registry.join(a, "alice").unwrap();
        registry.join(b, "alice").unwrap();
        registry.join(b, "alice").unwrap();
        assert_eq!(registry.connections_for_user("alice"), 2);

        registry.leave(a);
        assert_eq!(registry.connections_for_user("alice"), 1);
    }

    #[test]
    fn test_binding_another_user_is_rejected() {
        let registry = SessionRegistry::new();
        let conn = connect_as(&registry, "alice");

        assert_eq!(
            registry.join(conn, "bob"),
            Err(SessionError::IdentityMismatch(conn))
        );
        assert_eq!(registry.state(conn), SessionState::Connected);
        assert_eq!(registry.connections_for_user("bob"), 0);

        registry.join(conn, "alice").unwrap();
        assert_eq!(registry.join(conn, "bob"), Err(SessionError::IdentityMismatch(conn)));
        assert_eq!(registry.user_of(conn), Some("alice".to_string()));
    }

    #[test]
    fn test_leave_drops_chat_rooms() {
        let registry = SessionRegistry::new();
        let conn = connect(&registry);
        registry.join_room(conn, "c1").unwrap();
        assert_eq!(registry.senders_for(&Address::Chat("c1".into())).len(), 1);

        registry.leave(conn);
        assert!(registry.senders_for(&Address::Chat("c1".into())).is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let registry = SessionRegistry::new();
        let first = connect(&registry);
        registry.leave(first);
        let second = connect(&registry);
        assert_ne!(first, second);
    }
}
