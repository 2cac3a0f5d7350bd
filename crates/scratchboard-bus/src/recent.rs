//! Bounded memory of recently delivered envelope versions.
//!
//! The same envelope can reach a context twice, once over the broadcast
//! transport and once through the storage-change signal. The bus checks
//! this set before fanning a remote envelope out.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct RecentVersions {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentVersions {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record `version`. Returns `false` if it was already present.
    pub fn insert(&mut self, version: &str) -> bool {
        if self.seen.contains(version) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(version.to_string());
        self.seen.insert(version.to_string());
        true
    }

    pub fn contains(&self, version: &str) -> bool {
        self.seen.contains(version)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
