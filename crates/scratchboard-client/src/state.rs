//! Per-origin and per-tab state.
//!
//! An [`Origin`] holds the resources every tab of one origin shares: the
//! storage area and the broadcast hub. [`Origin::open_tab`] builds a
//! [`ClientContext`] with its own bus, catalog and card collection, wired so
//! catalog changes reach the collection as a new sampling source.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use scratchboard_bus::{BroadcastHub, SyncBus};
use scratchboard_scratch::{CardCollection, DisplayMapping, Transition};
use scratchboard_shared::constants::SYNC_CHANNEL;
use scratchboard_shared::{CatalogItem, ContextId};
use scratchboard_store::{DurableStore, KvBackend, MemoryBackend, SqliteBackend};

use crate::catalog::{CatalogStore, ListenerId};
use crate::config::ClientConfig;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Origin {
    storage: DurableStore,
    hub: BroadcastHub,
    config: ClientConfig,
    defaults: Vec<CatalogItem>,
}

impl Origin {
    /// An origin over `backend`.
    pub fn new(backend: Arc<dyn KvBackend>, config: ClientConfig) -> Self {
        Self {
            storage: DurableStore::new(backend),
            hub: BroadcastHub::new(),
            config,
            defaults: Vec::new(),
        }
    }

    pub fn in_memory(config: ClientConfig) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), config)
    }

    /// Open the storage area named by `config.db_path`, or the platform data
    /// directory when unset.
    pub fn open(config: ClientConfig) -> anyhow::Result<Self> {
        let backend = match &config.db_path {
            Some(path) => SqliteBackend::open_at(path)
                .with_context(|| format!("opening storage at {}", path.display()))?,
            None => SqliteBackend::new().context("opening default storage")?,
        };
        info!(path = ?backend.path(), "Storage opened");
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Open from `ClientConfig::from_env`. A config without `DB_PATH` keeps
    /// everything in memory.
    pub fn open_default() -> anyhow::Result<Self> {
        let config = ClientConfig::from_env();
        if config.db_path.is_none() {
            return Ok(Self::in_memory(config));
        }
        Self::open(config)
    }

    /// System default items seeded into an absent or corrupted catalog.
    pub fn with_system_defaults(mut self, defaults: Vec<CatalogItem>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a new tab of this origin.
    pub fn open_tab(&self) -> ClientContext {
        let context = ContextId::new();
        let store = self.storage.for_context(context);
        let bus = if self.config.broadcast {
            SyncBus::new(store.clone(), Arc::new(self.hub.channel(SYNC_CHANNEL)))
        } else {
            SyncBus::without_broadcast(store.clone())
        };

        let catalog = CatalogStore::open(
            store.clone(),
            bus.clone(),
            self.defaults.clone(),
            self.config.conflict_policy,
        );

        let cards = Arc::new(Mutex::new(CardCollection::new(
            self.config.card.clone(),
            Some(store),
        )));

        let sink = Arc::clone(&cards);
        let catalog_listener = catalog.subscribe(move |change| {
            lock(&sink).set_source(change.items.clone());
        });

        debug!(context = %context.short(), broadcast = self.config.broadcast, "Tab opened");

        ClientContext {
            context,
            sample_size: self.config.sample_size,
            buffer: (self.config.card.mask_width, self.config.card.mask_height),
            display: Mutex::new(DisplayMapping::identity()),
            bus,
            catalog,
            cards,
            catalog_listener,
        }
    }
}

/// One tab: a sync bus, a catalog and a card collection.
pub struct ClientContext {
    context: ContextId,
    sample_size: usize,
    buffer: (u32, u32),
    display: Mutex<DisplayMapping>,
    bus: SyncBus,
    catalog: CatalogStore,
    cards: Arc<Mutex<CardCollection>>,
    catalog_listener: ListenerId,
}

impl ClientContext {
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    /// Run `f` with the card collection locked.
    ///
    /// Do not mutate the catalog from inside `f`: catalog listeners lock the
    /// collection.
    pub fn with_cards<R>(&self, f: impl FnOnce(&mut CardCollection) -> R) -> R {
        f(&mut lock(&self.cards))
    }

    /// Sample (or restore) the configured number of cards from the current
    /// catalog.
    pub fn initialize_cards(&self) {
        let items = self.catalog.list();
        self.with_cards(|cards| cards.initialize(self.sample_size, items));
    }

    /// Draw a fresh sample from the latest catalog source.
    pub fn reset_cards(&self) {
        self.with_cards(CardCollection::reset);
    }

    pub fn revealed_count(&self) -> usize {
        self.with_cards(|cards| cards.revealed_count())
    }

    /// On-screen size of a card element. Stroke coordinates passed to this
    /// context are in that space; until this is called they are taken as
    /// buffer coordinates.
    pub fn set_display_size(&self, width: f32, height: f32) {
        *lock(&self.display) = DisplayMapping::new(self.buffer, (width, height));
    }

    pub fn begin_stroke(&self, index: usize, x: f32, y: f32) -> bool {
        let (x, y) = lock(&self.display).to_buffer(x, y);
        self.with_cards(|cards| cards.begin_stroke(index, x, y))
    }

    pub fn continue_stroke(&self, index: usize, x: f32, y: f32) -> Option<Transition> {
        let (x, y) = lock(&self.display).to_buffer(x, y);
        self.with_cards(|cards| cards.continue_stroke(index, x, y))
    }

    pub fn end_stroke(&self, index: usize) -> Option<Transition> {
        self.with_cards(|cards| cards.end_stroke(index))
    }

    pub fn cancel_stroke(&self, index: usize) -> Option<Transition> {
        self.with_cards(|cards| cards.cancel_stroke(index))
    }

    /// Deliver whatever other tabs published since the last call.
    pub fn poll(&self) -> usize {
        self.bus.poll_remote()
    }

    /// Follow other tabs from a background task instead of [`poll`](Self::poll).
    pub fn spawn_listener(&self) -> Option<JoinHandle<()>> {
        self.bus.spawn_listener()
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        self.catalog.unsubscribe(self.catalog_listener);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scratchboard_scratch::CardSettings;
    use scratchboard_shared::constants::CATALOG_KEY;
    use scratchboard_store::StorageChange;

    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            sample_size: 3,
            card: CardSettings {
                mask_width: 20,
                mask_height: 10,
                brush_radius: 0.5,
                scan_every: 1,
                scan_interval: Duration::ZERO,
            },
            ..ClientConfig::default()
        }
    }

    fn items(ids: &[&str]) -> Vec<CatalogItem> {
        ids.iter()
            .map(|id| CatalogItem::new(*id, id.to_uppercase(), format!("{id}.png")))
            .collect()
    }

    #[test]
    fn test_tabs_share_defaults_and_converge() {
        let origin = Origin::in_memory(config()).with_system_defaults(items(&["a", "b"]));
        let first = origin.open_tab();
        let second = origin.open_tab();

        assert_eq!(first.catalog().list(), second.catalog().list());
        assert!(first.catalog().list().iter().all(|item| item.is_system_default));

        first
            .catalog()
            .upsert(CatalogItem::new("c", "C", "c.png"))
            .unwrap();
        assert_eq!(second.poll(), 1);
        assert_eq!(first.catalog().list(), second.catalog().list());
        assert_ne!(first.context(), second.context());
    }

    #[test]
    fn test_broadcast_disabled_still_converges() {
        let config = ClientConfig {
            broadcast: false,
            ..config()
        };
        let origin = Origin::in_memory(config);
        let first = origin.open_tab();
        let second = origin.open_tab();

        first.catalog().replace_all(items(&["x"])).unwrap();
        assert_eq!(second.poll(), 1);
        assert_eq!(second.catalog().list(), items(&["x"]));
    }

    #[test]
    fn test_catalog_change_marks_source_without_touching_cards() {
        let origin = Origin::in_memory(config()).with_system_defaults(items(&["a", "b", "c"]));
        let tab = origin.open_tab();
        tab.initialize_cards();
        let before: Vec<String> = tab.with_cards(|cards| {
            cards.cards().iter().map(|card| card.id().to_string()).collect()
        });

        tab.catalog().replace_all(items(&["x", "y", "z"])).unwrap();

        tab.with_cards(|cards| {
            assert!(cards.source_changed());
            let ids: Vec<&str> = cards.cards().iter().map(|card| card.id()).collect();
            assert_eq!(ids, before);
        });

        tab.reset_cards();
        tab.with_cards(|cards| {
            assert!(!cards.source_changed());
            assert!(cards
                .cards()
                .iter()
                .all(|card| ["x", "y", "z"].contains(&card.id())));
        });
    }

    #[test]
    fn test_strokes_reveal_and_persist_session() {
        let origin = Origin::in_memory(config()).with_system_defaults(items(&["a", "b", "c"]));
        let tab = origin.open_tab();
        tab.initialize_cards();

        let mut transitions = Vec::new();
        for row in 0..3 {
            let y = row as f32 + 0.5;
            assert!(tab.begin_stroke(0, 0.5, y));
            transitions.extend(tab.continue_stroke(0, 19.5, y));
            transitions.extend(tab.end_stroke(0));
        }
        assert_eq!(transitions, vec![Transition::Started, Transition::Revealed]);
        assert_eq!(tab.revealed_count(), 1);

        // A new tab of the same origin restores the session.
        let reopened = origin.open_tab();
        reopened.initialize_cards();
        assert_eq!(reopened.revealed_count(), 1);
        assert!(reopened.with_cards(|cards| cards.cards()[0].is_revealed()));
    }

    #[test]
    fn test_cancelled_stroke_keeps_progress() {
        let origin = Origin::in_memory(config()).with_system_defaults(items(&["a", "b", "c"]));
        let tab = origin.open_tab();
        tab.initialize_cards();

        tab.begin_stroke(1, 0.5, 0.5);
        tab.continue_stroke(1, 9.5, 0.5);
        assert_eq!(tab.cancel_stroke(1), None);
        let progress = tab.with_cards(|cards| cards.cards()[1].progress());
        assert!((progress - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_strokes_map_display_coordinates() {
        let origin = Origin::in_memory(config()).with_system_defaults(items(&["a", "b", "c"]));
        let tab = origin.open_tab();
        tab.initialize_cards();
        // Cards render at twice the 20x10 buffer size.
        tab.set_display_size(40.0, 20.0);

        tab.begin_stroke(0, 1.0, 1.0);
        tab.continue_stroke(0, 39.0, 1.0);
        tab.end_stroke(0);

        let progress = tab.with_cards(|cards| cards.cards()[0].progress());
        assert!((progress - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_storage_only_tab_converges_after_many_writes() {
        let config = ClientConfig {
            broadcast: false,
            ..config()
        };
        let origin = Origin::in_memory(config).with_system_defaults(items(&["a", "b", "c"]));
        let writer = origin.open_tab();
        let reader = origin.open_tab();
        writer.initialize_cards();

        writer.catalog().upsert(CatalogItem::new("x", "T", "u")).unwrap();
        // Every finished stroke rewrites the session key.
        for _ in 0..300 {
            writer.begin_stroke(1, 0.5, 0.5);
            writer.continue_stroke(1, 0.5, 0.5);
            writer.end_stroke(1);
        }

        assert_eq!(reader.poll(), 1);
        assert_eq!(reader.catalog().list(), writer.catalog().list());
    }

    #[test]
    fn test_open_with_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            db_path: Some(dir.path().join("board.db")),
            ..config()
        };

        {
            let origin = Origin::open(config.clone()).unwrap();
            let tab = origin.open_tab();
            tab.catalog().upsert(CatalogItem::new("x", "T", "u")).unwrap();
        }

        let origin = Origin::open(config).unwrap();
        let tab = origin.open_tab();
        assert_eq!(tab.catalog().list(), vec![CatalogItem::new("x", "T", "u")]);
    }

    #[test]
    fn test_dropped_tab_detaches() {
        let origin = Origin::in_memory(config());
        let tab = origin.open_tab();
        let bus = tab.bus().clone();
        assert_eq!(bus.handler_count(), 1);
        drop(tab);
        assert_eq!(bus.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_listener_task_applies_remote_catalog() {
        let origin = Origin::in_memory(config());
        let writer = origin.open_tab();
        let reader = origin.open_tab();
        let mut changes: tokio::sync::broadcast::Receiver<StorageChange> =
            origin.storage.watch();
        let handle = reader.spawn_listener().unwrap();

        writer.catalog().upsert(CatalogItem::new("x", "T", "u")).unwrap();

        // The reader persists what it applies; wait for its catalog write.
        let reader_ctx = reader.context();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let change = changes.recv().await.unwrap();
                if change.origin == reader_ctx && change.key == CATALOG_KEY {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(reader.catalog().list(), writer.catalog().list());
        handle.abort();
    }
}
