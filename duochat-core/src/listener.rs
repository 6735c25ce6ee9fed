//! Inbound listener: accept peers until a session is attached or the endpoint closes.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::controller::Link;
use crate::transport::{Closeable, Listener, Transport};
use crate::worker::{Liveness, WorkerHandle, WorkerId};

/// Bind now, accept on a task. A bind failure leaves a worker that exits without accepting.
pub(crate) fn spawn<T: Transport>(
    runtime: &Handle,
    transport: &T,
    id: WorkerId,
    link: Link<T>,
) -> WorkerHandle<T::Listener> {
    let listener = {
        let _enter = runtime.enter();
        match transport.listen() {
            Ok(l) => Some(Arc::new(l)),
            Err(e) => {
                tracing::warn!(error = %e, "listener could not bind; inbound peers disabled");
                None
            }
        }
    };
    let live = Liveness::new();
    let task = runtime.spawn(run(listener.clone(), live.clone(), link));
    WorkerHandle::new(id, listener, task, live)
}

async fn run<T: Transport>(listener: Option<Arc<T::Listener>>, live: Liveness, link: Link<T>) {
    let Some(listener) = listener else {
        live.retire();
        link.listener_exited();
        return;
    };
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "inbound connection");
                if let ControlFlow::Break(()) = link.accepted(stream, peer) {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "accept ended");
                break;
            }
        }
    }
    live.retire();
    listener.close();
    link.listener_exited();
}
