//! In-memory transport: a process-local address registry standing in for the radio link.
//! Drives the controller in tests and lets hosts exercise a session without sockets.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::peer::PeerHandle;
use crate::signal::CloseSignal;
use crate::transport::{Closeable, ConnectTarget, DuplexStream, Listener, Transport, TransportError};

type Incoming = mpsc::UnboundedSender<(MemoryStream, PeerHandle)>;

/// Shared medium all memory transports of one test live on.
pub struct MemoryNetwork {
    registry: Mutex<Registry>,
    next_listener: AtomicU64,
}

#[derive(Default)]
struct Registry {
    listeners: HashMap<String, (u64, Incoming)>,
    /// Addresses whose connect attempts never complete on their own.
    stalled: HashSet<String>,
    /// In-flight connect attempts per address.
    pending: HashMap<String, usize>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            next_listener: AtomicU64::new(1),
        })
    }

    /// Transport for the endpoint `local`; its listener binds `local.address()`.
    pub fn transport(self: &Arc<Self>, local: PeerHandle) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local,
            discovery_cancels: AtomicUsize::new(0),
        }
    }

    /// Make connects to `address` hang until their target is closed.
    pub fn stall(&self, address: &str) {
        self.registry().stalled.insert(address.to_string());
    }

    pub fn pending_connects(&self, address: &str) -> usize {
        self.registry().pending.get(address).copied().unwrap_or(0)
    }

    pub fn is_listening(&self, address: &str) -> bool {
        self.registry().listeners.contains_key(address)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    local: PeerHandle,
    discovery_cancels: AtomicUsize,
}

impl MemoryTransport {
    pub fn local(&self) -> &PeerHandle {
        &self.local
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    /// How many times a connector asked to stop discovery.
    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::Relaxed)
    }
}

impl Transport for MemoryTransport {
    type Stream = MemoryStream;
    type Listener = MemoryListener;
    type Target = MemoryTarget;

    fn listen(&self) -> Result<MemoryListener, TransportError> {
        let address = self.local.address().to_string();
        let mut registry = self.network.registry();
        if registry.listeners.contains_key(&address) {
            return Err(TransportError::Bind(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{address} already bound"),
            )));
        }
        let id = self.network.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        registry.listeners.insert(address.clone(), (id, tx));
        Ok(MemoryListener {
            network: self.network.clone(),
            address,
            id,
            incoming: AsyncMutex::new(rx),
            close: CloseSignal::new(),
        })
    }

    fn resolve(&self, peer: &PeerHandle) -> Result<MemoryTarget, TransportError> {
        if peer.address().trim().is_empty() {
            return Err(TransportError::Resolve(peer.to_string()));
        }
        Ok(MemoryTarget {
            network: self.network.clone(),
            local: self.local.clone(),
            remote: peer.address().to_string(),
            close: CloseSignal::new(),
        })
    }

    fn cancel_discovery(&self) {
        self.discovery_cancels.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct MemoryListener {
    network: Arc<MemoryNetwork>,
    address: String,
    id: u64,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<(MemoryStream, PeerHandle)>>,
    close: CloseSignal,
}

impl Listener for MemoryListener {
    type Stream = MemoryStream;

    async fn accept(&self) -> Result<(MemoryStream, PeerHandle), TransportError> {
        self.close
            .guard(async {
                let mut incoming = self.incoming.lock().await;
                incoming.recv().await.ok_or(TransportError::Closed)
            })
            .await
    }
}

impl Closeable for MemoryListener {
    fn close(&self) {
        if !self.close.close() {
            return;
        }
        let mut registry = self.network.registry();
        // A newer listener may already own the address.
        if registry.listeners.get(&self.address).map(|(id, _)| *id) == Some(self.id) {
            registry.listeners.remove(&self.address);
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct MemoryTarget {
    network: Arc<MemoryNetwork>,
    local: PeerHandle,
    remote: String,
    close: CloseSignal,
}

impl ConnectTarget for MemoryTarget {
    type Stream = MemoryStream;

    async fn connect(&self) -> Result<MemoryStream, TransportError> {
        let _attempt = PendingAttempt::new(self.network.clone(), self.remote.clone());
        self.close
            .guard(async {
                let stalled = self.network.registry().stalled.contains(&self.remote);
                if stalled {
                    std::future::pending::<()>().await;
                }
                let incoming = self
                    .network
                    .registry()
                    .listeners
                    .get(&self.remote)
                    .map(|(_, tx)| tx.clone())
                    .ok_or_else(|| refused(&self.remote))?;
                let (local, remote) = MemoryStream::pair();
                incoming
                    .send((remote, self.local.clone()))
                    .map_err(|_| refused(&self.remote))?;
                Ok(local)
            })
            .await
    }
}

impl Closeable for MemoryTarget {
    fn close(&self) {
        self.close.close();
    }
}

fn refused(address: &str) -> TransportError {
    TransportError::Connect(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("nothing listening on {address}"),
    ))
}

/// Counts a connect attempt for as long as it is in flight.
struct PendingAttempt {
    network: Arc<MemoryNetwork>,
    address: String,
}

impl PendingAttempt {
    fn new(network: Arc<MemoryNetwork>, address: String) -> Self {
        *network.registry().pending.entry(address.clone()).or_default() += 1;
        Self { network, address }
    }
}

impl Drop for PendingAttempt {
    fn drop(&mut self) {
        let mut registry = self.network.registry();
        if let Some(n) = registry.pending.get_mut(&self.address) {
            *n = n.saturating_sub(1);
        }
    }
}

/// One end of an in-memory duplex pipe.
pub struct MemoryStream {
    inbound: AsyncMutex<Inbound>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    close: CloseSignal,
}

struct Inbound {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl MemoryStream {
    /// Two connected ends: bytes written to one are read from the other.
    pub fn pair() -> (MemoryStream, MemoryStream) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            inbound: AsyncMutex::new(Inbound {
                rx,
                pending: Vec::new(),
            }),
            outbound: Mutex::new(Some(tx)),
            close: CloseSignal::new(),
        }
    }

    /// Refuse further inbound data: the other end's writes fail while its reads keep working.
    pub async fn close_inbound(&self) {
        self.inbound.lock().await.rx.close();
    }
}

impl DuplexStream for MemoryStream {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.close
            .guard(async {
                let mut inbound = self.inbound.lock().await;
                while inbound.pending.is_empty() {
                    match inbound.rx.recv().await {
                        Some(chunk) => inbound.pending = chunk,
                        None => return Ok(0),
                    }
                }
                let n = buf.len().min(inbound.pending.len());
                buf[..n].copy_from_slice(&inbound.pending[..n]);
                inbound.pending.drain(..n);
                Ok(n)
            })
            .await
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.close.is_closed() {
            return Err(TransportError::Closed);
        }
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx.send(bytes.to_vec()).map_err(|_| {
                let e = io::Error::new(io::ErrorKind::BrokenPipe, "peer stopped reading");
                TransportError::Io(e)
            }),
            None => Err(TransportError::Closed),
        }
    }
}

impl Closeable for MemoryStream {
    fn close(&self) {
        if self.close.close() {
            // Dropping the sender is the other end's end-of-stream.
            self.outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn pair_moves_bytes_with_partial_reads() {
        let (a, b) = MemoryStream::pair();
        a.write(b"hello").await.unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(b.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(b.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
    }

    #[tokio::test]
    async fn close_unblocks_pending_read() {
        let (a, _b) = MemoryStream::pair();
        let a = Arc::new(a);
        let reader = a.clone();
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.close();
        a.close();
        let res = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
        assert!(matches!(res, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn closing_one_end_is_eof_for_the_other() {
        let (a, b) = MemoryStream::pair();
        a.write(b"bye").await.unwrap();
        a.close();
        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf).await.unwrap(), 3);
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(a.write(b"x").await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn close_inbound_fails_remote_writes() {
        let (a, b) = MemoryStream::pair();
        b.close_inbound().await;
        assert!(matches!(a.write(b"x").await, Err(TransportError::Io(_))));
        b.write(b"still flowing").await.unwrap();
    }

    #[tokio::test]
    async fn connect_without_listener_is_refused() {
        let net = MemoryNetwork::new();
        let t = net.transport(PeerHandle::new("a", "A"));
        let target = t.resolve(&PeerHandle::from_address("b")).unwrap();
        assert!(matches!(
            target.connect().await,
            Err(TransportError::Connect(_))
        ));
        assert_eq!(net.pending_connects("b"), 0);
    }

    #[test]
    fn empty_address_does_not_resolve() {
        let net = MemoryNetwork::new();
        let t = net.transport(PeerHandle::new("a", "A"));
        assert!(matches!(
            t.resolve(&PeerHandle::from_address("")),
            Err(TransportError::Resolve(_))
        ));
    }

    #[test]
    fn address_binds_once_until_closed() {
        let net = MemoryNetwork::new();
        let t = net.transport(PeerHandle::new("a", "A"));
        let first = t.listen().unwrap();
        assert!(matches!(t.listen(), Err(TransportError::Bind(_))));
        first.close();
        assert!(!net.is_listening("a"));
        let second = t.listen().unwrap();
        // Closing the stale listener again must not unbind the new one.
        first.close();
        assert!(net.is_listening("a"));
        drop(second);
        assert!(!net.is_listening("a"));
    }

    #[tokio::test]
    async fn accept_reports_connecting_peer() {
        let net = MemoryNetwork::new();
        let server = net.transport(PeerHandle::new("srv", "Server"));
        let client = net.transport(PeerHandle::new("cli", "Client"));
        let listener = server.listen().unwrap();
        let target = client.resolve(&PeerHandle::new("srv", "Server")).unwrap();
        let outbound = target.connect().await.unwrap();
        let (inbound, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, PeerHandle::new("cli", "Client"));

        outbound.write(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = inbound.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn stalled_connect_unblocks_on_close() {
        let net = MemoryNetwork::new();
        net.stall("slow");
        let t = net.transport(PeerHandle::new("a", "A"));
        let target = Arc::new(t.resolve(&PeerHandle::from_address("slow")).unwrap());
        let attempt = target.clone();
        let pending = tokio::spawn(async move { attempt.connect().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(net.pending_connects("slow"), 1);
        target.close();
        let res = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
        assert!(matches!(res, Err(TransportError::Closed)));
        assert_eq!(net.pending_connects("slow"), 0);
    }
}
