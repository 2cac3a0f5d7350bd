//! Persisted scratch session.
//!
//! Only scalar progress is stored; the mask pixels are not. A reloaded card
//! therefore reports its saved reveal state over a freshly opaque mask.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use scratchboard_shared::constants::SCRATCH_SESSION_KEY;
use scratchboard_store::DurableStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub revealed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub cards: Vec<CardRecord>,
    pub scratched_count: usize,
    /// Unix epoch millis of the write.
    pub saved_at: i64,
}

impl SessionRecord {
    pub fn new(cards: Vec<CardRecord>) -> Self {
        let scratched_count = cards.iter().filter(|card| card.revealed).count();
        Self {
            cards,
            scratched_count,
            saved_at: Utc::now().timestamp_millis(),
        }
    }

    /// Load the saved session; corrupted or missing data yields `None`.
    pub fn load(store: &DurableStore) -> Option<Self> {
        store.get(SCRATCH_SESSION_KEY)
    }

    pub fn save(&self, store: &DurableStore) {
        store.set(SCRATCH_SESSION_KEY, self);
    }
}
