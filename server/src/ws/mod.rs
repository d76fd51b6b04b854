pub mod actor;
pub mod dispatch;
pub mod handler;
pub mod protocol;
pub mod relay;
pub mod rooms;
pub mod sessions;

use std::fmt;

use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Process-unique id of a live socket connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub use dispatch::Dispatcher;
pub use rooms::{Address, RoomRegistry};
pub use sessions::{SessionRegistry, SessionState};
