//! TCP transport: listener, outbound target and duplex stream over tokio sockets.
//! Each new connection exchanges a hello frame before it is handed to the controller.

use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex as SyncMutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use duochat_core::wire::{frame_len, LEN_SIZE};
use duochat_core::{
    decode_hello, encode_hello, CloseSignal, Closeable, ConnectTarget, DuplexStream, Hello,
    Listener, PeerHandle, Transport, TransportError, PROTOCOL_VERSION,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// A peer that opens a socket and never greets is dropped after this long.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TcpTransport {
    bind: SocketAddr,
    hello: Hello,
}

impl TcpTransport {
    pub fn new(bind: SocketAddr, hello: Hello) -> Self {
        Self { bind, hello }
    }
}

impl Transport for TcpTransport {
    type Stream = TcpChatStream;
    type Listener = TcpChatListener;
    type Target = TcpChatTarget;

    fn listen(&self) -> Result<TcpChatListener, TransportError> {
        let std_listener = std::net::TcpListener::bind(self.bind).map_err(TransportError::Bind)?;
        std_listener
            .set_nonblocking(true)
            .map_err(TransportError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(TransportError::Bind)?;
        let listener = TcpChatListener {
            socket: SyncMutex::new(Some(listener)),
            hello: self.hello.clone(),
            close: CloseSignal::new(),
        };
        tracing::debug!(addr = ?listener.local_addr().ok(), "listening");
        Ok(listener)
    }

    /// Never blocks: literal addresses are parsed here, host names are looked up on connect.
    fn resolve(&self, peer: &PeerHandle) -> Result<TcpChatTarget, TransportError> {
        let destination = parse_destination(peer.address())
            .ok_or_else(|| TransportError::Resolve(peer.to_string()))?;
        Ok(TcpChatTarget {
            destination,
            hello: self.hello.clone(),
            close: CloseSignal::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Destination {
    Addr(SocketAddr),
    /// `host:port` still to be looked up.
    Host(String),
}

fn parse_destination(address: &str) -> Option<Destination> {
    if let Ok(addr) = address.parse() {
        return Some(Destination::Addr(addr));
    }
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() || host.contains(char::is_whitespace) || port.parse::<u16>().is_err() {
        return None;
    }
    Some(Destination::Host(address.to_string()))
}

pub struct TcpChatListener {
    /// Taken on close, so the port is free again once `close` returns.
    socket: SyncMutex<Option<TcpListener>>,
    hello: Hello,
    close: CloseSignal,
}

impl TcpChatListener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self.socket().as_ref() {
            Some(l) => l.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed")),
        }
    }

    fn socket(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(TcpStream, SocketAddr), TransportError>> {
        match self.socket().as_ref() {
            Some(l) => l.poll_accept(cx).map_err(TransportError::Accept),
            None => Poll::Ready(Err(TransportError::Closed)),
        }
    }
}

impl Listener for TcpChatListener {
    type Stream = TcpChatStream;

    /// Next peer that completes the hello. Failed handshakes are logged and skipped.
    async fn accept(&self) -> Result<(TcpChatStream, PeerHandle), TransportError> {
        self.close
            .guard(async {
                loop {
                    let (stream, addr) = std::future::poll_fn(|cx| self.poll_accept(cx)).await?;
                    match handshake(stream, &self.hello).await {
                        Ok((stream, remote)) => {
                            return Ok((stream, PeerHandle::new(addr.to_string(), remote.name)));
                        }
                        Err(e) => {
                            tracing::debug!(%addr, error = %e, "inbound handshake failed");
                        }
                    }
                }
            })
            .await
    }
}

impl Closeable for TcpChatListener {
    fn close(&self) {
        self.close.close();
        if let Some(socket) = self.socket().take() {
            tracing::debug!(addr = ?socket.local_addr().ok(), "listener closed");
        }
    }
}

pub struct TcpChatTarget {
    destination: Destination,
    hello: Hello,
    close: CloseSignal,
}

impl TcpChatTarget {
    async fn lookup(&self) -> Result<SocketAddr, TransportError> {
        match &self.destination {
            Destination::Addr(addr) => Ok(*addr),
            Destination::Host(host) => tokio::net::lookup_host(host.as_str())
                .await
                .map_err(TransportError::Connect)?
                .next()
                .ok_or_else(|| TransportError::Resolve(host.clone())),
        }
    }
}

impl ConnectTarget for TcpChatTarget {
    type Stream = TcpChatStream;

    async fn connect(&self) -> Result<TcpChatStream, TransportError> {
        self.close
            .guard(async {
                let addr = self.lookup().await?;
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(TransportError::Connect)?;
                let (stream, remote) = handshake(stream, &self.hello).await?;
                tracing::debug!(%addr, name = %remote.name, "outbound handshake done");
                Ok(stream)
            })
            .await
    }
}

impl Closeable for TcpChatTarget {
    fn close(&self) {
        self.close.close();
    }
}

/// Split socket so a read and a write can be pending at the same time.
pub struct TcpChatStream {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    close: CloseSignal,
}

impl TcpChatStream {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            close: CloseSignal::new(),
        }
    }
}

impl DuplexStream for TcpChatStream {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.close
            .guard(async {
                let mut reader = self.reader.lock().await;
                Ok(reader.read(buf).await?)
            })
            .await
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.close
            .guard(async {
                let mut writer = self.writer.lock().await;
                writer.write_all(bytes).await?;
                writer.flush().await?;
                Ok(())
            })
            .await
    }
}

impl Closeable for TcpChatStream {
    fn close(&self) {
        self.close.close();
    }
}

/// Send our hello, read theirs, and check that both ends speak the same service.
async fn handshake(
    mut stream: TcpStream,
    hello: &Hello,
) -> Result<(TcpChatStream, Hello), TransportError> {
    let remote = tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange_hello(&mut stream, hello))
        .await
        .map_err(|_| TransportError::Handshake("timed out waiting for hello".into()))??;
    if remote.protocol_version != PROTOCOL_VERSION {
        return Err(TransportError::Handshake(format!(
            "unsupported protocol version {}",
            remote.protocol_version
        )));
    }
    if remote.service_id != hello.service_id {
        return Err(TransportError::Handshake(format!(
            "unknown service {}",
            remote.service_id
        )));
    }
    Ok((TcpChatStream::new(stream), remote))
}

async fn exchange_hello(stream: &mut TcpStream, hello: &Hello) -> Result<Hello, TransportError> {
    let frame = encode_hello(hello).map_err(|e| TransportError::Handshake(e.to_string()))?;
    stream.write_all(&frame).await?;
    stream.flush().await?;

    let mut header = [0u8; LEN_SIZE];
    stream.read_exact(&mut header).await?;
    let len = frame_len(header).map_err(|e| TransportError::Handshake(e.to_string()))?;
    let mut frame = vec![0u8; LEN_SIZE + len];
    frame[..LEN_SIZE].copy_from_slice(&header);
    stream.read_exact(&mut frame[LEN_SIZE..]).await?;
    let (remote, _) = decode_hello(&frame).map_err(|e| TransportError::Handshake(e.to_string()))?;
    Ok(remote)
}
