//! Fan-out dispatcher: delivers typed events to every live connection of a
//! user. Delivery is fire-and-forget; offline recipients are skipped.

use std::sync::Arc;

use axum::extract::ws::Message;

use super::protocol::OutboundEvent;
use super::rooms::Address;
use super::sessions::SessionRegistry;
use super::ConnectionId;

#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    fn encode(event: &OutboundEvent) -> Option<Message> {
        match event.encode() {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "Failed to encode event");
                None
            }
        }
    }

    fn send_frame(&self, address: &Address, frame: &Message) -> usize {
        let mut delivered = 0;
        for sender in self.sessions.senders_for(address) {
            // A closed channel means the writer is already gone.
            if sender.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver `event` to every connection bound to `user_id`. Returns the
    /// number of connections reached.
    pub fn dispatch(&self, user_id: &str, event: &OutboundEvent) -> usize {
        let Some(frame) = Self::encode(event) else {
            return 0;
        };
        let delivered = self.send_frame(&Address::User(user_id.to_string()), &frame);
        tracing::trace!(user_id = %user_id, event = event.name(), delivered, "Dispatched");
        delivered
    }

    /// Deliver the same event to every recipient except `exclude`. The frame
    /// is encoded once. Duplicate recipients receive it once.
    pub fn fan_out<'a, I>(&self, recipients: I, exclude: Option<&str>, event: &OutboundEvent) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(frame) = Self::encode(event) else {
            return 0;
        };

        let mut seen = std::collections::HashSet::new();
        let mut delivered = 0;
        for user_id in recipients {
            if Some(user_id) == exclude || !seen.insert(user_id) {
                continue;
            }
            delivered += self.send_frame(&Address::User(user_id.to_string()), &frame);
        }
        tracing::debug!(
            event = event.name(),
            recipients = seen.len(),
            delivered,
            "Fan-out complete"
        );
        delivered
    }

    /// Send an event back to one connection.
    pub fn reply(&self, conn: ConnectionId, event: &OutboundEvent) -> bool {
        let Some(frame) = Self::encode(event) else {
            return false;
        };
        self.sessions
            .sender(conn)
            .is_some_and(|sender| sender.send(frame).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::Frame;
    use tokio::sync::mpsc;

    fn bound(
        registry: &SessionRegistry,
        user: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry.connect(tx, user);
        registry.join(conn, user).unwrap();
        (conn, rx)
    }

    fn event_name(msg: Message) -> String {
        match msg {
            Message::Text(text) => serde_json::from_str::<Frame>(text.as_str()).unwrap().event,
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_reaches_every_connection_of_user() {
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(sessions.clone());
        let (_a, mut rx_a) = bound(&sessions, "alice");
        let (_b, mut rx_b) = bound(&sessions, "alice");

        assert_eq!(dispatcher.dispatch("alice", &OutboundEvent::GroupDisplayNew), 2);
        assert_eq!(event_name(rx_a.try_recv().unwrap()), "group-display-new");
        assert_eq!(event_name(rx_b.try_recv().unwrap()), "group-display-new");
    }

    #[test]
    fn test_dispatch_to_offline_user_is_noop() {
        let dispatcher = Dispatcher::new(Arc::new(SessionRegistry::new()));
        assert_eq!(dispatcher.dispatch("nobody", &OutboundEvent::GroupDisplayNew), 0);
    }

    #[test]
    fn test_fan_out_excludes_actor_and_dedups() {
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(sessions.clone());
        let (_a, mut rx_a) = bound(&sessions, "alice");
        let (_b, mut rx_b) = bound(&sessions, "bob");

        let delivered = dispatcher.fan_out(
            ["alice", "bob", "bob", "carol"],
            Some("alice"),
            &OutboundEvent::GroupDisplayNew,
        );
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_skipped() {
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(sessions.clone());
        let (_conn, rx) = bound(&sessions, "alice");
        drop(rx);
        assert_eq!(dispatcher.dispatch("alice", &OutboundEvent::SessionReady), 0);
    }

    #[test]
    fn test_reply_targets_single_connection() {
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(sessions.clone());
        let (a, mut rx_a) = bound(&sessions, "alice");
        let (_b, mut rx_b) = bound(&sessions, "alice");

        assert!(dispatcher.reply(a, &OutboundEvent::SessionReady));
        assert_eq!(event_name(rx_a.try_recv().unwrap()), "session-ready");
        assert!(rx_b.try_recv().is_err());
    }
}
