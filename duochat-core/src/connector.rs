//! Outbound connector: exactly one connect attempt to one peer, no retry.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::controller::Link;
use crate::peer::PeerHandle;
use crate::transport::{Closeable, ConnectTarget, Transport};
use crate::worker::{Liveness, WorkerHandle, WorkerId};

pub(crate) fn spawn<T: Transport>(
    runtime: &Handle,
    transport: Arc<T>,
    peer: PeerHandle,
    id: WorkerId,
    link: Link<T>,
) -> WorkerHandle<T::Target> {
    let target = {
        let _enter = runtime.enter();
        match transport.resolve(&peer) {
            Ok(t) => Some(Arc::new(t)),
            Err(e) => {
                tracing::warn!(%peer, error = %e, "cannot resolve peer");
                None
            }
        }
    };
    let live = Liveness::new();
    let task = runtime.spawn(run(transport, target.clone(), peer, live.clone(), link));
    WorkerHandle::new(id, target, task, live)
}

async fn run<T: Transport>(
    transport: Arc<T>,
    target: Option<Arc<T::Target>>,
    peer: PeerHandle,
    live: Liveness,
    link: Link<T>,
) {
    let Some(target) = target else {
        live.retire();
        link.connect_failed();
        return;
    };
    transport.cancel_discovery();
    let res = target.connect().await;
    live.retire();
    match res {
        Ok(stream) => {
            tracing::debug!(%peer, "outbound connection established");
            link.connect_succeeded(stream, peer);
        }
        Err(e) => {
            tracing::debug!(%peer, error = %e, "connect failed");
            target.close();
            link.connect_failed();
        }
    }
}
