//! Notifications the core emits to the host (presentation layer).

use tokio::sync::mpsc;

use crate::peer::PeerHandle;
use crate::state::ConnectionState;

/// Shown once when an outbound attempt fails, before listening resumes.
pub const CONNECTION_FAILED_MESSAGE: &str = "Unable to connect device";

/// Shown once when an active session drops, before listening resumes.
pub const CONNECTION_LOST_MESSAGE: &str = "Device connection was lost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    PeerAttached(PeerHandle),
    /// One successful read. `count` is what the read produced; `bytes` holds exactly those.
    BytesReceived { bytes: Vec<u8>, count: usize },
    /// Bytes fully written to the stream (local echo).
    BytesSent(Vec<u8>),
    UserMessage(String),
}

impl SessionEvent {
    /// Data carried by a read or write event.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            SessionEvent::BytesReceived { bytes, count } => {
                Some(bytes.get(..*count).unwrap_or(bytes.as_slice()))
            }
            SessionEvent::BytesSent(bytes) => Some(bytes),
            _ => None,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;
