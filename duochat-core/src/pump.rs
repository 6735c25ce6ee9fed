//! Session pump: owns the connected stream, reads into events and drains the write queue.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::controller::Link;
use crate::event::{EventSender, SessionEvent};
use crate::peer::PeerHandle;
use crate::transport::{Closeable, DuplexStream, Transport};
use crate::worker::{Liveness, WorkerHandle, WorkerId};

pub(crate) struct PumpHandle<S> {
    worker: WorkerHandle<S>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    peer: PeerHandle,
}

impl<S: DuplexStream> PumpHandle<S> {
    pub(crate) fn id(&self) -> WorkerId {
        self.worker.id()
    }

    pub(crate) fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Queue bytes for the writer task. Dropped silently once the writer is gone.
    pub(crate) fn enqueue(&self, bytes: Vec<u8>) {
        let _ = self.outbound.send(bytes);
    }

    pub(crate) fn cancel(&self) {
        self.worker.cancel();
    }

    pub(crate) fn is_live(&self) -> bool {
        self.worker.is_live()
    }
}

pub(crate) fn spawn<T: Transport>(
    runtime: &Handle,
    stream: T::Stream,
    peer: PeerHandle,
    buffer_size: usize,
    events: EventSender,
    id: WorkerId,
    link: Link<T>,
) -> PumpHandle<T::Stream> {
    let stream = Arc::new(stream);
    let (outbound, queue) = mpsc::unbounded_channel();
    runtime.spawn(write_loop(stream.clone(), queue, events.clone()));
    let live = Liveness::new();
    let reader = runtime.spawn(read_loop(
        stream.clone(),
        buffer_size.max(1),
        events,
        live.clone(),
        link,
    ));
    PumpHandle {
        worker: WorkerHandle::new(id, Some(stream), reader, live),
        outbound,
        peer,
    }
}

async fn read_loop<T: Transport>(
    stream: Arc<T::Stream>,
    buffer_size: usize,
    events: EventSender,
    live: Liveness,
    link: Link<T>,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("peer closed the stream");
                break;
            }
            Ok(n) => {
                let _ = events.send(SessionEvent::BytesReceived {
                    bytes: buf[..n].to_vec(),
                    count: n,
                });
            }
            Err(e) => {
                tracing::debug!(error = %e, "read failed");
                break;
            }
        }
    }
    live.retire();
    stream.close();
    link.read_failed();
}

/// Best effort: a failed write is logged and dropped, never treated as a lost session.
async fn write_loop<S: DuplexStream>(
    stream: Arc<S>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    events: EventSender,
) {
    while let Some(bytes) = queue.recv().await {
        match stream.write(&bytes).await {
            Ok(()) => {
                let _ = events.send(SessionEvent::BytesSent(bytes));
            }
            Err(e) => {
                tracing::debug!(error = %e, len = bytes.len(), "write dropped");
            }
        }
    }
}
