//! Transport capability consumed by the core: listen, resolve + connect, duplex streams.
//!
//! Every resource can be closed from another task; a close must make a pending accept,
//! connect or read on the same resource fail. That is the only way the core cancels work.

use std::future::Future;

use crate::peer::PeerHandle;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
    #[error("cannot resolve peer {0}")]
    Resolve(String),
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("resource closed")]
    Closed,
}

/// Idempotent close, safe to call while another task is blocked on the resource.
pub trait Closeable {
    fn close(&self);
}

/// Established connection. Reads and writes take `&self` so a closer can share it.
pub trait DuplexStream: Closeable + Send + Sync + 'static {
    /// Read into `buf`. `Ok(0)` means the peer closed the stream.
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Write all of `bytes`.
    fn write(&self, bytes: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Bound endpoint accepting inbound peers.
pub trait Listener: Closeable + Send + Sync + 'static {
    type Stream: DuplexStream;

    /// Wait for the next inbound connection and the peer it came from.
    fn accept(
        &self,
    ) -> impl Future<Output = Result<(Self::Stream, PeerHandle), TransportError>> + Send;
}

/// Resolved outbound target; one connect attempt per target.
pub trait ConnectTarget: Closeable + Send + Sync + 'static {
    type Stream: DuplexStream;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;
}

/// Shared transport adapter handed to the controller at construction.
pub trait Transport: Send + Sync + 'static {
    type Stream: DuplexStream;
    type Listener: Listener<Stream = Self::Stream>;
    type Target: ConnectTarget<Stream = Self::Stream>;

    /// Bind the local endpoint. Called with the controller's runtime entered.
    fn listen(&self) -> Result<Self::Listener, TransportError>;

    /// Turn a peer handle into something connectable.
    fn resolve(&self, peer: &PeerHandle) -> Result<Self::Target, TransportError>;

    /// Stop any discovery/advertising that would slow a connect. Best effort.
    fn cancel_discovery(&self) {}
}
