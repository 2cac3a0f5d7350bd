//! The catalog synchronization bus.
//!
//! Every [`SyncBus::publish`] fires three delivery paths:
//!
//! 1. **In-process**: synchronous fan-out to handlers registered on this bus.
//! 2. **Broadcast**: a [`Frame`] posted on the [`SyncTransport`] for other
//!    contexts of the same origin.
//! 3. **Storage fallback**: the envelope is written under
//!    [`SYNC_STORAGE_KEY`], which other contexts observe as a storage change.
//!
//! Remote envelopes (paths 2 and 3) are picked up by [`SyncBus::poll_remote`]
//! or by the task started with [`SyncBus::spawn_listener`], and fanned out
//! once per version. Publishing never fails from the caller's point of view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use scratchboard_shared::constants::{RECENT_VERSION_CAPACITY, SYNC_CHANNEL, SYNC_STORAGE_KEY};
use scratchboard_shared::{ContextId, SyncEnvelope};
use scratchboard_store::{DurableStore, StorageChange};

use crate::error::BusError;
use crate::recent::RecentVersions;
use crate::transport::{Frame, NoopTransport, SyncTransport};

pub type Handler = Arc<dyn Fn(&SyncEnvelope) + Send + Sync>;

#[derive(Clone)]
pub struct SyncBus {
    pub(crate) inner: Arc<BusInner>,
}

pub(crate) struct BusInner {
    pub(crate) context: ContextId,
    store: DurableStore,
    transport: Arc<dyn SyncTransport>,
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
    recent: Mutex<RecentVersions>,
    pub(crate) remote: Mutex<RemoteReceivers>,
}

/// Receivers for the two remote paths. Taken by the listener task once it
/// starts; until then [`SyncBus::poll_remote`] drains them.
pub(crate) struct RemoteReceivers {
    pub(crate) frames: Option<broadcast::Receiver<Frame>>,
    pub(crate) storage: Option<broadcast::Receiver<StorageChange>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncBus {
    /// Create a bus for the context owning `store`, broadcasting over
    /// `transport`.
    ///
    /// Remote receivers are attached immediately so nothing published after
    /// this call is missed.
    pub fn new(store: DurableStore, transport: Arc<dyn SyncTransport>) -> Self {
        let remote = RemoteReceivers {
            frames: transport.listen(),
            storage: Some(store.watch()),
        };

        debug!(
            context = %store.context().short(),
            channel = SYNC_CHANNEL,
            transport = transport.name(),
            "Sync bus created"
        );

        Self {
            inner: Arc::new(BusInner {
                context: store.context(),
                store,
                transport,
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                recent: Mutex::new(RecentVersions::new(RECENT_VERSION_CAPACITY)),
                remote: Mutex::new(remote),
            }),
        }
    }

    /// A bus without a broadcast primitive: in-process plus storage fallback.
    pub fn without_broadcast(store: DurableStore) -> Self {
        Self::new(store, Arc::new(NoopTransport))
    }

    pub fn context(&self) -> ContextId {
        self.inner.context
    }

    /// Publish `envelope` on every delivery path.
    pub fn publish(&self, envelope: SyncEnvelope) {
        let inner = &self.inner;
        lock(&inner.recent).insert(&envelope.version);

        let local = inner.fan_out(&envelope);

        let frame = Frame {
            origin: inner.context,
            envelope,
        };
        match inner.transport.post(&frame) {
            Ok(()) => {}
            Err(BusError::Unsupported(name)) => {
                debug!(transport = name, "Broadcast unsupported, relying on storage fallback");
            }
            Err(e) => warn!(error = %e, "Broadcast post failed, relying on storage fallback"),
        }

        inner.store.set(SYNC_STORAGE_KEY, &frame.envelope);

        debug!(
            context = %inner.context.short(),
            version = %frame.envelope.version,
            items = frame.envelope.payload.len(),
            local_handlers = local,
            "Envelope published"
        );
    }

    /// Register `handler` for every envelope delivered to this context,
    /// including ones this context publishes itself.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncEnvelope) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.handlers).push((id, Arc::new(handler)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.inner.handlers).len()
    }

    /// Hand `envelope` to every local handler, bypassing the bus-level
    /// version memory. This is what a transport echo looks like to handlers.
    pub fn fan_out(&self, envelope: &SyncEnvelope) -> usize {
        self.inner.fan_out(envelope)
    }

    /// Drain both remote paths and deliver what arrived. Returns the number
    /// of envelopes fanned out.
    ///
    /// Does nothing once [`spawn_listener`](Self::spawn_listener) has taken
    /// the receivers.
    pub fn poll_remote(&self) -> usize {
        let mut envelopes = Vec::new();
        {
            let mut remote = lock(&self.inner.remote);

            if let Some(rx) = remote.frames.as_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(frame) => envelopes.extend(self.inner.accept_frame(frame)),
                        Err(TryRecvError::Lagged(skipped)) => {
                            warn!(skipped, "Broadcast receiver lagged");
                            envelopes.extend(self.inner.recover_storage());
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                    }
                }
            }

            if let Some(rx) = remote.storage.as_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(change) => envelopes.extend(self.inner.accept_storage(change)),
                        Err(TryRecvError::Lagged(skipped)) => {
                            warn!(skipped, "Storage change receiver lagged");
                            envelopes.extend(self.inner.recover_storage());
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                    }
                }
            }
        }

        envelopes
            .into_iter()
            .filter(|(envelope, path)| self.inner.deliver_remote(envelope, path))
            .count()
    }
}

impl BusInner {
    pub(crate) fn fan_out(&self, envelope: &SyncEnvelope) -> usize {
        // Handlers may publish; never hold the lock while calling them.
        let handlers: Vec<Handler> = lock(&self.handlers)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in &handlers {
            handler(envelope);
        }
        handlers.len()
    }

    pub(crate) fn accept_frame(&self, frame: Frame) -> Option<(SyncEnvelope, &'static str)> {
        if frame.origin == self.context {
            return None;
        }
        Some((frame.envelope, "broadcast"))
    }

    pub(crate) fn accept_storage(
        &self,
        change: StorageChange,
    ) -> Option<(SyncEnvelope, &'static str)> {
        if change.origin == self.context || change.key != SYNC_STORAGE_KEY {
            return None;
        }
        let raw = change.new_value?;
        match SyncEnvelope::from_json(&raw) {
            Ok(envelope) => Some((envelope, "storage")),
            Err(e) => {
                warn!(key = %change.key, error = %e, "Ignoring malformed envelope in storage");
                None
            }
        }
    }

    /// Re-read the last envelope written to storage. A lagged receiver may
    /// have dropped its change signal; version dedupe absorbs the repeat when
    /// it did not.
    pub(crate) fn recover_storage(&self) -> Option<(SyncEnvelope, &'static str)> {
        let envelope = self.store.get::<SyncEnvelope>(SYNC_STORAGE_KEY)?;
        Some((envelope, "storage-recovery"))
    }

    /// Fan out a remote envelope unless this version was already delivered.
    pub(crate) fn deliver_remote(&self, envelope: &SyncEnvelope, path: &str) -> bool {
        if !lock(&self.recent).insert(&envelope.version) {
            debug!(version = %envelope.version, path, "Duplicate envelope dropped");
            return false;
        }
        let handlers = self.fan_out(envelope);
        debug!(
            context = %self.context.short(),
            version = %envelope.version,
            path,
            handlers,
            "Remote envelope delivered"
        );
        true
    }
}

/// Handle returned by [`SyncBus::subscribe`].
#[must_use = "keep the subscription to unsubscribe later"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the handler. Later envelopes are not delivered to it.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            lock(&inner.handlers).retain(|(id, _)| *id != self.id);
        }
    }
}
