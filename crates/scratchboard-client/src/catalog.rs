//! The positions catalog: a materialized snapshot kept in sync across
//! contexts.
//!
//! Every mutation writes the whole snapshot through the [`DurableStore`] and
//! then publishes it on the [`SyncBus`]. Every envelope delivered by the bus
//! replaces the snapshot wholesale. There is no merge: whichever envelope is
//! applied last wins.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info};

use scratchboard_bus::{Subscription, SyncBus};
use scratchboard_shared::constants::CATALOG_KEY;
use scratchboard_shared::{CatalogItem, SyncEnvelope};
use scratchboard_store::DurableStore;

use crate::error::Result;
use crate::events::{CatalogChange, ChangeOrigin};

/// How a store resolves envelopes arriving from other contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Apply every envelope in arrival order.
    #[default]
    ArrivalOrder,
    /// Drop envelopes stamped earlier than the last one applied.
    NewestTimestamp,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arrival" => Ok(Self::ArrivalOrder),
            "timestamp" => Ok(Self::NewestTimestamp),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// Handle returned by [`CatalogStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&CatalogChange) + Send + Sync>;

#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    store: DurableStore,
    bus: SyncBus,
    policy: ConflictPolicy,
    state: Mutex<Snapshot>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    bus_subscription: Mutex<Option<Subscription>>,
}

struct Snapshot {
    items: Vec<CatalogItem>,
    /// Version of the last envelope published or applied here.
    last_version: Option<String>,
    last_timestamp: i64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CatalogStore {
    /// Load the persisted catalog and start following `bus`.
    ///
    /// A missing or undecodable catalog key is replaced by `defaults`, each
    /// flagged as a system default, and written back.
    pub fn open(
        store: DurableStore,
        bus: SyncBus,
        defaults: Vec<CatalogItem>,
        policy: ConflictPolicy,
    ) -> Self {
        let items = match store.get::<Vec<CatalogItem>>(CATALOG_KEY) {
            Some(items) => items,
            None => {
                let seeded: Vec<CatalogItem> =
                    defaults.into_iter().map(CatalogItem::system_default).collect();
                info!(items = seeded.len(), "Seeding catalog with system defaults");
                store.set(CATALOG_KEY, &seeded);
                seeded
            }
        };

        debug!(
            context = %store.context().short(),
            items = items.len(),
            ?policy,
            "Catalog opened"
        );

        let inner = Arc::new(CatalogInner {
            store,
            bus: bus.clone(),
            policy,
            state: Mutex::new(Snapshot {
                items,
                last_version: None,
                last_timestamp: i64::MIN,
            }),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            bus_subscription: Mutex::new(None),
        });

        let weak: Weak<CatalogInner> = Arc::downgrade(&inner);
        let subscription = bus.subscribe(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_remote(envelope);
            }
        });
        *lock(&inner.bus_subscription) = Some(subscription);

        Self { inner }
    }

    /// Current snapshot.
    pub fn list(&self) -> Vec<CatalogItem> {
        lock(&self.inner.state).items.clone()
    }

    pub fn get(&self, id: &str) -> Option<CatalogItem> {
        lock(&self.inner.state)
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.state).items.is_empty()
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.inner.policy
    }

    /// Insert `item`, or replace the item with the same id in place.
    ///
    /// Invalid items are rejected before anything is persisted or published.
    pub fn upsert(&self, item: CatalogItem) -> Result<()> {
        item.validate()?;

        let id = item.id.clone();
        let replaced = self.inner.commit(|items| {
            match items.iter().position(|existing| existing.id == item.id) {
                Some(index) => {
                    items[index] = item;
                    true
                }
                None => {
                    items.push(item);
                    false
                }
            }
        });

        info!(id = %id, replaced, "Catalog item upserted");
        Ok(())
    }

    /// Remove the item with `id`. Returns `false`, publishing nothing, when
    /// no such item exists.
    pub fn remove(&self, id: &str) -> bool {
        let present = lock(&self.inner.state).items.iter().any(|item| item.id == id);
        if !present {
            debug!(id, "Remove of unknown catalog item ignored");
            return false;
        }

        self.inner.commit(|items| items.retain(|item| item.id != id));
        info!(id, "Catalog item removed");
        true
    }

    /// Replace the whole catalog, e.g. with an empty list to clear it.
    ///
    /// Every item is validated first; one invalid item rejects the batch.
    /// Later duplicates of an id replace earlier ones in place.
    pub fn replace_all(&self, items: Vec<CatalogItem>) -> Result<()> {
        for item in &items {
            item.validate()?;
        }

        let mut unique: Vec<CatalogItem> = Vec::with_capacity(items.len());
        for item in items {
            match unique.iter().position(|existing| existing.id == item.id) {
                Some(index) => unique[index] = item,
                None => unique.push(item),
            }
        }

        let count = unique.len();
        self.inner.commit(move |current| *current = unique);
        info!(items = count, "Catalog replaced");
        Ok(())
    }

    /// Register `listener` for every change applied to this store, local or
    /// remote.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CatalogChange) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        ListenerId(id)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id.0);
        listeners.len() != before
    }
}

impl CatalogInner {
    /// Mutate the snapshot, persist it, notify listeners, then publish.
    ///
    /// The write happens under the snapshot lock so the stored catalog
    /// always matches the last snapshot installed in memory.
    fn commit<R>(&self, mutate: impl FnOnce(&mut Vec<CatalogItem>) -> R) -> R {
        let (result, items, envelope) = {
            let mut state = lock(&self.state);
            let result = mutate(&mut state.items);
            let envelope = SyncEnvelope::new(state.items.clone());
            state.last_version = Some(envelope.version.clone());
            state.last_timestamp = envelope.timestamp;
            self.store.set(CATALOG_KEY, &state.items);
            (result, state.items.clone(), envelope)
        };

        self.notify(CatalogChange {
            items,
            origin: ChangeOrigin::Local,
        });
        self.bus.publish(envelope);
        result
    }

    fn apply_remote(&self, envelope: &SyncEnvelope) {
        {
            let mut state = lock(&self.state);
            if state.last_version.as_deref() == Some(envelope.version.as_str()) {
                debug!(version = %envelope.version, "Ignoring echo of applied envelope");
                return;
            }
            if self.policy == ConflictPolicy::NewestTimestamp
                && envelope.timestamp < state.last_timestamp
            {
                debug!(
                    version = %envelope.version,
                    timestamp = envelope.timestamp,
                    last = state.last_timestamp,
                    "Dropping stale envelope"
                );
                return;
            }
            state.items = envelope.payload.clone();
            state.last_version = Some(envelope.version.clone());
            state.last_timestamp = envelope.timestamp;
            self.store.set(CATALOG_KEY, &envelope.payload);
        }

        debug!(
            context = %self.store.context().short(),
            version = %envelope.version,
            items = envelope.payload.len(),
            "Applied remote catalog"
        );
        self.notify(CatalogChange {
            items: envelope.payload.clone(),
            origin: ChangeOrigin::Remote,
        });
    }

    fn notify(&self, change: CatalogChange) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }
}

impl Drop for CatalogInner {
    fn drop(&mut self) {
        let subscription = self
            .bus_subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scratchboard_bus::BroadcastHub;
    use scratchboard_shared::constants::SYNC_CHANNEL;
    use scratchboard_shared::{ContextId, MediaKind};
    use scratchboard_store::MemoryBackend;

    use super::*;
    use crate::CatalogError;

    fn memory_store() -> DurableStore {
        DurableStore::new(Arc::new(MemoryBackend::new()))
    }

    fn open(store: &DurableStore, bus: &SyncBus) -> CatalogStore {
        CatalogStore::open(store.clone(), bus.clone(), Vec::new(), ConflictPolicy::ArrivalOrder)
    }

    fn recorder(catalog: &CatalogStore) -> Arc<Mutex<Vec<CatalogChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        catalog.subscribe(move |change| sink.lock().unwrap().push(change.clone()));
        seen
    }

    // Two tabs sharing one storage area and one broadcast hub.
    fn two_tabs() -> ((DurableStore, SyncBus), (DurableStore, SyncBus)) {
        let hub = BroadcastHub::new();
        let a = memory_store();
        let b = a.for_context(ContextId::new());
        let bus_a = SyncBus::new(a.clone(), Arc::new(hub.channel(SYNC_CHANNEL)));
        let bus_b = SyncBus::new(b.clone(), Arc::new(hub.channel(SYNC_CHANNEL)));
        ((a, bus_a), (b, bus_b))
    }

    #[test]
    fn test_upsert_converges_on_shared_bus() {
        let store = memory_store();
        let bus = SyncBus::without_broadcast(store.clone());
        let a = open(&store, &bus);
        let b = open(&store, &bus);

        a.upsert(CatalogItem::new("x", "T", "u")).unwrap();

        assert_eq!(a.list(), b.list());
        assert_eq!(b.list().len(), 1);
    }

    #[test]
    fn test_duplicate_id_is_update() {
        let store = memory_store();
        let catalog = open(&store, &SyncBus::without_broadcast(store.clone()));

        catalog.upsert(CatalogItem::new("x", "First", "u")).unwrap();
        catalog.upsert(CatalogItem::new("y", "Other", "v")).unwrap();
        catalog.upsert(CatalogItem::new("x", "Second", "u")).unwrap();

        let items = catalog.list();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "x");
        assert_eq!(items[0].title, "Second");
    }

    #[test]
    fn test_invalid_item_rejected_and_not_published() {
        let store = memory_store();
        let bus = SyncBus::without_broadcast(store.clone());
        let catalog = open(&store, &bus);
        let published = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&published);
        let _sub = bus.subscribe(move |_| *counter.lock().unwrap() += 1);

        let err = catalog.upsert(CatalogItem::new("  ", "T", "u")).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
        assert!(catalog.upsert(CatalogItem::new("x", "T", "")).is_err());

        assert!(catalog.is_empty());
        assert_eq!(*published.lock().unwrap(), 0);
        assert_eq!(store.get::<Vec<CatalogItem>>(CATALOG_KEY), Some(Vec::new()));
    }

    #[test]
    fn test_mutations_persist_snapshot() {
        let store = memory_store();
        let catalog = open(&store, &SyncBus::without_broadcast(store.clone()));

        catalog.upsert(CatalogItem::new("x", "T", "u")).unwrap();
        catalog.upsert(CatalogItem::new("y", "U", "v")).unwrap();
        assert!(catalog.remove("x"));
        assert!(!catalog.remove("x"));

        let persisted: Vec<CatalogItem> = store.get(CATALOG_KEY).unwrap();
        assert_eq!(persisted, catalog.list());
        assert_eq!(catalog.get("y").map(|item| item.title), Some("U".to_string()));
    }

    #[test]
    fn test_self_echo_not_reapplied() {
        let store = memory_store();
        let bus = SyncBus::without_broadcast(store.clone());
        let catalog = open(&store, &bus);
        let changes = recorder(&catalog);

        let captured = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&captured);
        let _sub = bus.subscribe(move |envelope| *slot.lock().unwrap() = Some(envelope.clone()));

        catalog.upsert(CatalogItem::new("x", "T", "u")).unwrap();
        assert_eq!(changes.lock().unwrap().len(), 1);

        // The transport hands our own envelope back.
        let envelope = captured.lock().unwrap().clone().unwrap();
        bus.fan_out(&envelope);

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].origin, ChangeOrigin::Local);
    }

    #[test]
    fn test_corrupted_catalog_falls_back_to_defaults() {
        let store = memory_store();
        store.set_raw(CATALOG_KEY, "not json at all");

        let defaults = vec![
            CatalogItem::new("d1", "Default one", "d1.png"),
            CatalogItem::new("d2", "Default two", "d2.gif").with_kind(MediaKind::Gif),
        ];
        let catalog = CatalogStore::open(
            store.clone(),
            SyncBus::without_broadcast(store.clone()),
            defaults,
            ConflictPolicy::ArrivalOrder,
        );

        let items = catalog.list();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.is_system_default));
        assert_eq!(store.get::<Vec<CatalogItem>>(CATALOG_KEY), Some(items));
    }

    #[test]
    fn test_existing_catalog_wins_over_defaults() {
        let store = memory_store();
        store.set(CATALOG_KEY, &vec![CatalogItem::new("x", "T", "u")]);

        let catalog = CatalogStore::open(
            store.clone(),
            SyncBus::without_broadcast(store.clone()),
            vec![CatalogItem::new("d1", "Default", "d.png")],
            ConflictPolicy::ArrivalOrder,
        );
        assert_eq!(catalog.list(), vec![CatalogItem::new("x", "T", "u")]);
    }

    #[test]
    fn test_replace_all_then_upsert_across_tabs() {
        let ((store_a, bus_a), (store_b, bus_b)) = two_tabs();
        let defaults = vec![CatalogItem::new("d1", "Default", "d.png")];
        let a = CatalogStore::open(store_a, bus_a, defaults.clone(), ConflictPolicy::ArrivalOrder);
        let b = CatalogStore::open(store_b, bus_b.clone(), defaults, ConflictPolicy::ArrivalOrder);
        let changes = recorder(&b);

        a.replace_all(Vec::new()).unwrap();
        a.upsert(CatalogItem::new("x", "T", "u").with_kind(MediaKind::Image))
            .unwrap();
        assert!(a.list().len() == 1 && b.list().len() == 1 && b.list()[0].id == "d1");

        // Two envelopes, each seen on both the broadcast and storage paths.
        assert_eq!(bus_b.poll_remote(), 2);

        assert_eq!(b.list(), vec![CatalogItem::new("x", "T", "u")]);
        assert_eq!(a.list(), b.list());
        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| change.origin == ChangeOrigin::Remote));
    }

    #[test]
    fn test_storage_only_tab_converges() {
        let ((store_a, bus_a), (store_b, _)) = two_tabs();
        let bus_b = SyncBus::without_broadcast(store_b.clone());
        let a = open(&store_a, &bus_a);
        let b = open(&store_b, &bus_b);

        a.upsert(CatalogItem::new("x", "T", "u")).unwrap();
        assert!(b.is_empty());

        assert_eq!(bus_b.poll_remote(), 1);
        assert_eq!(b.list(), a.list());
    }

    #[test]
    fn test_replace_all_validates_and_dedupes() {
        let store = memory_store();
        let catalog = open(&store, &SyncBus::without_broadcast(store.clone()));
        catalog.upsert(CatalogItem::new("keep", "K", "k")).unwrap();

        let bad = vec![CatalogItem::new("a", "A", "a"), CatalogItem::new("b", "", "b")];
        assert!(catalog.replace_all(bad).is_err());
        assert_eq!(catalog.list()[0].id, "keep");

        catalog
            .replace_all(vec![
                CatalogItem::new("a", "A1", "a"),
                CatalogItem::new("b", "B", "b"),
                CatalogItem::new("a", "A2", "a"),
            ])
            .unwrap();
        let items = catalog.list();
        assert_eq!(items.len(), 2);
        assert_eq!((items[0].id.as_str(), items[0].title.as_str()), ("a", "A2"));
    }

    #[test]
    fn test_arrival_order_last_wins() {
        let store = memory_store();
        let bus = SyncBus::without_broadcast(store.clone());
        let catalog = open(&store, &bus);

        let newer = SyncEnvelope::new(vec![CatalogItem::new("new", "N", "n")]);
        let mut older = SyncEnvelope::new(vec![CatalogItem::new("old", "O", "o")]);
        older.timestamp = newer.timestamp - 1_000;

        bus.fan_out(&newer);
        bus.fan_out(&older);
        assert_eq!(catalog.list()[0].id, "old");
    }

    #[test]
    fn test_newest_timestamp_drops_stale() {
        let store = memory_store();
        let bus = SyncBus::without_broadcast(store.clone());
        let catalog = CatalogStore::open(
            store.clone(),
            bus.clone(),
            Vec::new(),
            ConflictPolicy::NewestTimestamp,
        );

        let newer = SyncEnvelope::new(vec![CatalogItem::new("new", "N", "n")]);
        let mut older = SyncEnvelope::new(vec![CatalogItem::new("old", "O", "o")]);
        older.timestamp = newer.timestamp - 1_000;

        bus.fan_out(&newer);
        bus.fan_out(&older);
        assert_eq!(catalog.list()[0].id, "new");
        assert_eq!(store.get::<Vec<CatalogItem>>(CATALOG_KEY).unwrap()[0].id, "new");
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let store = memory_store();
        let bus = SyncBus::without_broadcast(store.clone());
        let catalog = open(&store, &bus);
        let changes = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&changes);
        let id = catalog.subscribe(move |_| *counter.lock().unwrap() += 1);

        catalog.upsert(CatalogItem::new("x", "T", "u")).unwrap();
        assert!(catalog.unsubscribe(id));
        assert!(!catalog.unsubscribe(id));
        catalog.upsert(CatalogItem::new("y", "T", "u")).unwrap();
        assert_eq!(*changes.lock().unwrap(), 1);

        assert_eq!(bus.handler_count(), 1);
        drop(catalog);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn test_concurrent_apply_and_upsert_keep_storage_in_step() {
        let store = memory_store();
        let bus = SyncBus::without_broadcast(store.clone());
        let catalog = open(&store, &bus);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200 {
                    let id = format!("remote-{i}");
                    bus.fan_out(&SyncEnvelope::new(vec![CatalogItem::new(id, "R", "r")]));
                }
            });
            scope.spawn(|| {
                for i in 0..200 {
                    let id = format!("local-{i}");
                    catalog.upsert(CatalogItem::new(id, "L", "l")).unwrap();
                }
            });
        });

        assert_eq!(store.get::<Vec<CatalogItem>>(CATALOG_KEY), Some(catalog.list()));
    }

    #[test]
    fn test_conflict_policy_from_str() {
        assert_eq!("arrival".parse::<ConflictPolicy>(), Ok(ConflictPolicy::ArrivalOrder));
        assert_eq!(
            " Timestamp ".parse::<ConflictPolicy>(),
            Ok(ConflictPolicy::NewestTimestamp)
        );
        assert!("merge".parse::<ConflictPolicy>().is_err());
    }
}
