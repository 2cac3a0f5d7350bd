//! Typed JSON persistence over a [`KvBackend`].
//!
//! A [`DurableStore`] is one execution context's handle on a shared storage
//! area. Handles created with [`DurableStore::for_context`] share the backend
//! and the change signal, so a successful write from one context is observed
//! as a [`StorageChange`] by every context, the writer included. Each change
//! carries its writing context so receivers can skip their own.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use scratchboard_shared::constants::BROADCAST_CAPACITY;
use scratchboard_shared::ContextId;

use crate::backend::KvBackend;

/// Signal emitted after a key is written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// Raw value after the change, `None` when the key was removed.
    pub new_value: Option<String>,
    /// Context that performed the write.
    pub origin: ContextId,
}

#[derive(Clone)]
pub struct DurableStore {
    backend: Arc<dyn KvBackend>,
    changes: broadcast::Sender<StorageChange>,
    context: ContextId,
}

impl DurableStore {
    /// Create the first context handle on a fresh storage area.
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        let (changes, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            backend,
            changes,
            context: ContextId::new(),
        }
    }

    /// A handle for another context sharing this storage area.
    pub fn for_context(&self, context: ContextId) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            changes: self.changes.clone(),
            context,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Read and decode `key`.
    ///
    /// Absent keys, backend failures and malformed JSON all return `None`;
    /// callers treat every case as "never written".
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding corrupted stored value");
                None
            }
        }
    }

    /// Encode and write `value` under `key`.
    ///
    /// Fire-and-forget: a failed write is logged and dropped, in-memory state
    /// stays authoritative for the session.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, &raw),
            Err(e) => warn!(key, error = %e, "Failed to encode value, write dropped"),
        }
    }

    pub fn remove(&self, key: &str) {
        match self.backend.delete(key) {
            Ok(()) => self.signal(key, None),
            Err(e) => warn!(key, error = %e, "Storage remove failed"),
        }
    }

    /// Read the undecoded value under `key`.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        match self.backend.read(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Storage read failed");
                None
            }
        }
    }

    /// Write a raw string under `key`, bypassing JSON encoding.
    pub fn set_raw(&self, key: &str, raw: &str) {
        match self.backend.write(key, raw) {
            Ok(()) => {
                debug!(key, len = raw.len(), context = %self.context.short(), "Stored value");
                self.signal(key, Some(raw.to_string()));
            }
            Err(e) => warn!(key, error = %e, "Storage write failed, write dropped"),
        }
    }

    /// Subscribe to changes made by any context sharing this storage area.
    ///
    /// Receivers see every change, including this context's own; use
    /// [`StorageChange::origin`] to skip those.
    pub fn watch(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    fn signal(&self, key: &str, new_value: Option<String>) {
        // No receivers is the common single-context case.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
            origin: self.context,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        count: u32,
    }

    fn store() -> DurableStore {
        DurableStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_set_then_get() {
        let store = store();
        store.set("k", &Sample { count: 3 });
        assert_eq!(store.get::<Sample>("k"), Some(Sample { count: 3 }));
    }

    #[test]
    fn test_missing_key_is_none() {
        assert_eq!(store().get::<Sample>("nothing"), None);
    }

    #[test]
    fn test_corrupted_value_is_none() {
        let store = store();
        store.set_raw("k", "{not json");
        assert_eq!(store.get::<Sample>("k"), None);
        // Wrong shape is corruption too.
        store.set_raw("k", r#"{"count":"three"}"#);
        assert_eq!(store.get::<Sample>("k"), None);
    }

    #[test]
    fn test_quota_failure_is_swallowed() {
        let store = DurableStore::new(Arc::new(MemoryBackend::with_quota(8)));
        let mut rx = store.watch();
        store.set("key", &"a value far larger than eight bytes");
        assert_eq!(store.get::<String>("key"), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove() {
        let store = store();
        store.set("k", &Sample { count: 1 });
        store.remove("k");
        assert_eq!(store.get::<Sample>("k"), None);
    }

    #[test]
    fn test_contexts_share_backend_and_signal() {
        let tab_a = store();
        let tab_b = tab_a.for_context(ContextId::new());
        let mut rx = tab_b.watch();

        tab_a.set("k", &Sample { count: 9 });
        assert_eq!(tab_b.get::<Sample>("k"), Some(Sample { count: 9 }));

        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "k");
        assert_eq!(change.origin, tab_a.context());
        assert_eq!(change.new_value.as_deref(), Some(r#"{"count":9}"#));

        tab_b.remove("k");
        let change = rx.try_recv().unwrap();
        assert_eq!(change.new_value, None);
        assert_eq!(change.origin, tab_b.context());
    }
}
