//! Owned handle for one running worker task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::transport::Closeable;

/// Identifies one worker instance. Callbacks carrying a stale id are ignored.
pub(crate) type WorkerId = u64;

/// Set while the worker still serves its purpose. The task retires it as soon as it leaves
/// its main loop, before reporting back under the controller lock.
#[derive(Debug, Clone)]
pub(crate) struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn retire(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) struct WorkerHandle<R: ?Sized> {
    id: WorkerId,
    /// `None` when the worker never got its resource (bind or resolve failed).
    resource: Option<Arc<R>>,
    task: JoinHandle<()>,
    live: Liveness,
}

impl<R: Closeable + ?Sized> WorkerHandle<R> {
    pub(crate) fn new(
        id: WorkerId,
        resource: Option<Arc<R>>,
        task: JoinHandle<()>,
        live: Liveness,
    ) -> Self {
        Self {
            id,
            resource,
            task,
            live,
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Close the resource so the pending operation fails. Does not wait for the task.
    pub(crate) fn cancel(&self) {
        if let Some(resource) = &self.resource {
            resource.close();
        }
    }

    /// Still inside its main loop. False once the worker has given up, even if its exit
    /// callback has not run yet.
    pub(crate) fn is_live(&self) -> bool {
        self.live.is_live() && !self.task.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn retire(&self) {
        self.live.retire();
    }
}
