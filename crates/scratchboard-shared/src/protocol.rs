use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::CatalogItem;

/// The unit carried over the sync bus.
///
/// Replication is by whole-snapshot replacement: `payload` always holds the
/// full catalog, never a delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEnvelope {
    pub payload: Vec<CatalogItem>,
    /// Producer-local wall clock at publish (Unix epoch millis).
    pub timestamp: i64,
    /// Random per-publish token. Only used to recognise an echo.
    pub version: String,
}

impl SyncEnvelope {
    /// Wrap a snapshot with a fresh version token and the current time.
    pub fn new(payload: Vec<CatalogItem>) -> Self {
        Self {
            payload,
            timestamp: Utc::now().timestamp_millis(),
            version: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_unique() {
        let a = SyncEnvelope::new(Vec::new());
        let b = SyncEnvelope::new(Vec::new());
        assert_ne!(a.version, b.version);
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = SyncEnvelope::new(vec![CatalogItem::new("x", "T", "u")]);
        let json = serde_json::to_string(&envelope).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["payload"].is_array());
        assert!(value["timestamp"].is_i64());
        assert!(value["version"].is_string());

        let restored = SyncEnvelope::from_json(&json).unwrap();
        assert_eq!(restored, envelope);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(SyncEnvelope::from_json("not json").is_err());
    }
}
