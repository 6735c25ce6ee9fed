//! Session controller: owns the connection state and the three worker slots.
//!
//! Every public operation and every worker callback runs under one mutex guarding
//! {state, listener, connector, pump}, so "cancel old handle, install new one" is atomic.
//! Workers never see those fields; they hold a [`Link`] carrying their own worker id, and
//! callbacks from a worker that is no longer in its slot are ignored.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::event::{
    EventReceiver, EventSender, SessionEvent, CONNECTION_FAILED_MESSAGE, CONNECTION_LOST_MESSAGE,
};
use crate::peer::PeerHandle;
use crate::pump::PumpHandle;
use crate::state::ConnectionState;
use crate::transport::{Closeable, Transport};
use crate::worker::{WorkerHandle, WorkerId};
use crate::{connector, listener, pump};

/// Which workers are currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveWorkers {
    pub listener: bool,
    pub connector: bool,
    pub pump: bool,
}

/// Cheap to clone; all clones drive the same session.
pub struct SessionController<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for SessionController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> SessionController<T> {
    /// Build on the current tokio runtime. Panics outside a runtime, like `tokio::spawn`.
    pub fn new(transport: T, config: Config) -> (Self, EventReceiver) {
        Self::with_runtime(transport, config, Handle::current())
    }

    /// Build with an explicit runtime; the controller may then be driven from any thread.
    pub fn with_runtime(transport: T, config: Config, runtime: Handle) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            transport: Arc::new(transport),
            config,
            runtime,
            events,
            next_worker: AtomicU64::new(1),
            slots: Mutex::new(Slots::default()),
        });
        (Self { inner }, rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Peer of the running session, if any.
    pub fn peer(&self) -> Option<PeerHandle> {
        self.inner.lock().pump.as_ref().map(|p| p.peer().clone())
    }

    pub fn active_workers(&self) -> ActiveWorkers {
        let slots = self.inner.lock();
        ActiveWorkers {
            listener: slots.listener.as_ref().is_some_and(WorkerHandle::is_live),
            connector: slots.connector.as_ref().is_some_and(WorkerHandle::is_live),
            pump: slots.pump.as_ref().is_some_and(PumpHandle::is_live),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Drop any outbound attempt or session and listen. No-op when already listening.
    pub fn start(&self) {
        let mut slots = self.inner.lock();
        self.inner.start_locked(&mut slots);
    }

    /// Attempt an outbound connection. A running listener keeps running; first success wins.
    pub fn connect(&self, peer: PeerHandle) {
        let mut slots = self.inner.lock();
        self.inner.connect_locked(&mut slots, peer);
    }

    /// Attach an established stream, stopping every other worker.
    pub fn connected(&self, stream: T::Stream, peer: PeerHandle) {
        let mut slots = self.inner.lock();
        self.inner.connected_locked(&mut slots, stream, peer);
    }

    pub fn stop(&self) {
        let mut slots = self.inner.lock();
        slots.cancel_connector();
        slots.cancel_pump();
        slots.cancel_listener();
        self.inner.set_state(&mut slots, ConnectionState::Idle);
    }

    /// Queue bytes on the session. Silently dropped unless connected.
    pub fn write(&self, bytes: &[u8]) {
        let slots = self.inner.lock();
        if slots.state != ConnectionState::Connected {
            tracing::debug!(len = bytes.len(), "not connected; write dropped");
            return;
        }
        if let Some(pump) = &slots.pump {
            pump.enqueue(bytes.to_vec());
        }
    }

    /// Report a failed outbound attempt and resume listening. Normally called by the connector.
    pub fn connection_failed(&self) {
        let mut slots = self.inner.lock();
        self.inner.failed_locked(&mut slots);
    }

    /// Report a dropped session and resume listening. Normally called by the pump.
    pub fn connection_lost(&self) {
        let mut slots = self.inner.lock();
        self.inner.lost_locked(&mut slots);
    }
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    config: Config,
    runtime: Handle,
    events: EventSender,
    next_worker: AtomicU64,
    slots: Mutex<Slots<T>>,
}

struct Slots<T: Transport> {
    state: ConnectionState,
    listener: Option<WorkerHandle<T::Listener>>,
    connector: Option<WorkerHandle<T::Target>>,
    pump: Option<PumpHandle<T::Stream>>,
}

impl<T: Transport> Default for Slots<T> {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            listener: None,
            connector: None,
            pump: None,
        }
    }
}

impl<T: Transport> Slots<T> {
    fn cancel_listener(&mut self) {
        if let Some(w) = self.listener.take() {
            w.cancel();
        }
    }

    fn cancel_connector(&mut self) {
        if let Some(w) = self.connector.take() {
            w.cancel();
        }
    }

    fn cancel_pump(&mut self) {
        if let Some(p) = self.pump.take() {
            p.cancel();
        }
    }

    fn listener_is(&self, worker: WorkerId) -> bool {
        self.listener.as_ref().map(WorkerHandle::id) == Some(worker)
    }

    fn connector_is(&self, worker: WorkerId) -> bool {
        self.connector.as_ref().map(WorkerHandle::id) == Some(worker)
    }

    fn pump_is(&self, worker: WorkerId) -> bool {
        self.pump.as_ref().map(PumpHandle::id) == Some(worker)
    }
}

impl<T: Transport> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // Host may have dropped the receiver; the session keeps running regardless.
        let _ = self.events.send(event);
    }

    fn set_state(&self, slots: &mut Slots<T>, state: ConnectionState) {
        if slots.state == state {
            return;
        }
        tracing::debug!(from = %slots.state, to = %state, "state change");
        slots.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn link(self: &Arc<Self>) -> Link<T> {
        Link {
            inner: Arc::downgrade(self),
            worker: self.next_worker.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn start_locked(self: &Arc<Self>, slots: &mut Slots<T>) {
        slots.cancel_connector();
        slots.cancel_pump();
        self.set_state(slots, ConnectionState::Listening);
        // A listener that already left its accept loop is replaced; its exit report is stale.
        let running = slots.listener.as_ref().is_some_and(WorkerHandle::is_live);
        if !running {
            slots.cancel_listener();
            let link = self.link();
            let id = link.worker;
            slots.listener = Some(listener::spawn(&self.runtime, &*self.transport, id, link));
        }
    }

    fn connect_locked(self: &Arc<Self>, slots: &mut Slots<T>, peer: PeerHandle) {
        // Only a Connecting session holds a connector; other states have an empty slot.
        slots.cancel_connector();
        slots.cancel_pump();
        tracing::debug!(%peer, "connecting");
        let link = self.link();
        let id = link.worker;
        slots.connector = Some(connector::spawn(
            &self.runtime,
            self.transport.clone(),
            peer,
            id,
            link,
        ));
        self.set_state(slots, ConnectionState::Connecting);
    }

    fn connected_locked(
        self: &Arc<Self>,
        slots: &mut Slots<T>,
        stream: T::Stream,
        peer: PeerHandle,
    ) {
        slots.cancel_connector();
        slots.cancel_pump();
        slots.cancel_listener();
        tracing::info!(%peer, "session attached");
        // Announce before the pump starts so no BytesReceived precedes PeerAttached.
        self.emit(SessionEvent::PeerAttached(peer.clone()));
        self.set_state(slots, ConnectionState::Connected);
        let link = self.link();
        let id = link.worker;
        slots.pump = Some(pump::spawn(
            &self.runtime,
            stream,
            peer,
            self.config.read_buffer_size,
            self.events.clone(),
            id,
            link,
        ));
    }

    fn failed_locked(self: &Arc<Self>, slots: &mut Slots<T>) {
        self.emit(SessionEvent::UserMessage(CONNECTION_FAILED_MESSAGE.to_string()));
        self.start_locked(slots);
    }

    fn lost_locked(self: &Arc<Self>, slots: &mut Slots<T>) {
        self.emit(SessionEvent::UserMessage(CONNECTION_LOST_MESSAGE.to_string()));
        self.start_locked(slots);
    }

    fn on_accepted(
        self: &Arc<Self>,
        worker: WorkerId,
        stream: T::Stream,
        peer: PeerHandle,
    ) -> ControlFlow<()> {
        let mut slots = self.lock();
        if !slots.listener_is(worker) {
            stream.close();
            return ControlFlow::Break(());
        }
        match slots.state {
            ConnectionState::Listening | ConnectionState::Connecting => {
                self.connected_locked(&mut slots, stream, peer);
                ControlFlow::Break(())
            }
            ConnectionState::Idle => {
                tracing::debug!(%peer, "not ready; inbound connection closed");
                stream.close();
                ControlFlow::Continue(())
            }
            ConnectionState::Connected => {
                tracing::debug!(%peer, "already connected; inbound connection closed");
                stream.close();
                ControlFlow::Break(())
            }
        }
    }

    fn on_connect_succeeded(
        self: &Arc<Self>,
        worker: WorkerId,
        stream: T::Stream,
        peer: PeerHandle,
    ) {
        let mut slots = self.lock();
        if !slots.connector_is(worker) {
            tracing::debug!(%peer, "connect finished after cancel; stream closed");
            stream.close();
            return;
        }
        // Finished naturally: clear the slot so it is not cancelled later.
        slots.connector = None;
        self.connected_locked(&mut slots, stream, peer);
    }

    fn on_connect_failed(self: &Arc<Self>, worker: WorkerId) {
        let mut slots = self.lock();
        if !slots.connector_is(worker) {
            return;
        }
        slots.connector = None;
        self.failed_locked(&mut slots);
    }

    fn on_read_failed(self: &Arc<Self>, worker: WorkerId) {
        let mut slots = self.lock();
        if !slots.pump_is(worker) {
            return;
        }
        slots.pump = None;
        self.lost_locked(&mut slots);
    }

    fn on_listener_exited(&self, worker: WorkerId) {
        let mut slots = self.lock();
        if slots.listener_is(worker) {
            tracing::debug!("listener stopped");
            slots.listener = None;
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        slots.cancel_connector();
        slots.cancel_pump();
        slots.cancel_listener();
    }
}

/// A worker's only view of the controller: its callbacks, tagged with the worker's id.
pub(crate) struct Link<T: Transport> {
    inner: Weak<Inner<T>>,
    worker: WorkerId,
}

impl<T: Transport> Link<T> {
    /// Hand over an accepted stream. `Break` tells the listener to stop accepting.
    pub(crate) fn accepted(&self, stream: T::Stream, peer: PeerHandle) -> ControlFlow<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.on_accepted(self.worker, stream, peer),
            None => {
                stream.close();
                ControlFlow::Break(())
            }
        }
    }

    pub(crate) fn connect_succeeded(&self, stream: T::Stream, peer: PeerHandle) {
        match self.inner.upgrade() {
            Some(inner) => inner.on_connect_succeeded(self.worker, stream, peer),
            None => stream.close(),
        }
    }

    pub(crate) fn connect_failed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_connect_failed(self.worker);
        }
    }

    pub(crate) fn read_failed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_read_failed(self.worker);
        }
    }

    pub(crate) fn listener_exited(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_listener_exited(self.worker);
        }
    }
}
