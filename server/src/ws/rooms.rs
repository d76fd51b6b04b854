//! Membership registry: which connections are joined to which address.

use std::collections::HashSet;

use dashmap::DashMap;

use super::ConnectionId;

/// A delivery address. Users and chats live in separate namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    User(String),
    Chat(String),
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<Address, HashSet<ConnectionId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already joined.
    pub fn join(&self, address: Address, conn: ConnectionId) -> bool {
        self.rooms.entry(address).or_default().insert(conn)
    }

    pub fn leave(&self, address: &Address, conn: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(address) {
            members.remove(&conn);
        }
        // Empty rooms are dropped.
        self.rooms.remove_if(address, |_, members| members.is_empty());
    }

    pub fn members(&self, address: &Address) -> Vec<ConnectionId> {
        self.rooms
            .get(address)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let rooms = RoomRegistry::new();
        let addr = Address::User("u1".into());
        assert!(rooms.join(addr.clone(), ConnectionId(1)));
        assert!(!rooms.join(addr.clone(), ConnectionId(1)));
        assert!(rooms.join(addr.clone(), ConnectionId(2)));

        let mut members = rooms.members(&addr);
        members.sort();
        assert_eq!(members, vec![ConnectionId(1), ConnectionId(2)]);
    }

    #[test]
    fn test_user_and_chat_addresses_do_not_collide() {
        let rooms = RoomRegistry::new();
        rooms.join(Address::User("x".into()), ConnectionId(1));
        rooms.join(Address::Chat("x".into()), ConnectionId(2));
        assert_eq!(rooms.members(&Address::User("x".into())), vec![ConnectionId(1)]);
        assert_eq!(rooms.members(&Address::Chat("x".into())), vec![ConnectionId(2)]);
    }

    #[test]
    fn test_leaving_last_member_drops_room() {
        let rooms = RoomRegistry::new();
        let addr = Address::Chat("c1".into());
        rooms.join(addr.clone(), ConnectionId(7));
        rooms.leave(&addr, ConnectionId(7));
        assert!(rooms.members(&addr).is_empty());
        assert_eq!(rooms.room_count(), 0);
    }
}
