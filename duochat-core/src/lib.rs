//! Duochat session core: one peer-to-peer chat connection at a time.
//! Host supplies a transport and consumes events; core runs listener, connector and pump workers.

pub mod config;
pub mod controller;
pub mod event;
pub mod memory;
pub mod peer;
pub mod signal;
pub mod state;
pub mod transport;
pub mod wire;

mod connector;
mod listener;
mod pump;
mod worker;

pub use config::{Config, ConfigError};
pub use controller::{ActiveWorkers, SessionController};
pub use event::{EventReceiver, EventSender, SessionEvent};
pub use peer::PeerHandle;
pub use signal::CloseSignal;
pub use state::ConnectionState;
pub use transport::{Closeable, ConnectTarget, DuplexStream, Listener, Transport, TransportError};
pub use wire::{
    decode_hello, encode_hello, FrameDecodeError, FrameEncodeError, Hello, PROTOCOL_VERSION,
};
