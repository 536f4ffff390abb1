// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded, TTL-governed cache of message keys for out-of-order decryption.
//!
//! The cache is the only place where exposed message-key material lives outside an in-flight
//! encryption. Entries are keyed by `(step id, counter)`, carry their insertion timestamp and
//! are consumed at most once. Capacity pressure first drops expired entries, then the oldest
//! one; a per-step cap additionally drops the smallest counter of an overflowing step.
//!
//! Evictions are counted per step: a later lookup miss for an already-derived counter can then
//! be told apart from a replayed message (see session decrypt).
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::ratchet::chain::CHAIN_KEY_SIZE;
use crate::ratchet::step::StepId;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SkippedEntry {
    seed: Secret<CHAIN_KEY_SIZE>,
    inserted_at: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct StepCounters {
    live: u32,
    evicted: u32,
}

/// Session-global skipped-key cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkippedKeyStore {
    entries: HashMap<(StepId, u32), SkippedEntry>,
    counters: HashMap<StepId, StepCounters>,
    max_keys: usize,
    max_keys_per_step: usize,
    ttl_millis: u64,
}

impl SkippedKeyStore {
    pub fn new(max_keys: usize, max_keys_per_step: usize, ttl_millis: u64) -> Self {
        Self {
            entries: HashMap::new(),
            counters: HashMap::new(),
            max_keys,
            max_keys_per_step,
            ttl_millis,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, step_id: &str, counter: u32) -> bool {
        self.entries
            .contains_key(&(step_id.to_owned(), counter))
    }

    /// Insertion timestamp of the oldest live entry.
    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.entries.values().map(|entry| entry.inserted_at).min()
    }

    /// Number of keys evicted (expiry, capacity or step overflow) for a step since it was first
    /// seen. Lookup misses for derived counters are only duplicates when this is zero.
    pub fn evictions_for(&self, step_id: &str) -> u32 {
        self.counters
            .get(step_id)
            .map(|counters| counters.evicted)
            .unwrap_or(0)
    }

    /// Stores the message-key precursor for a skipped counter.
    pub fn store(
        &mut self,
        step_id: &str,
        counter: u32,
        seed: Secret<CHAIN_KEY_SIZE>,
        now_millis: u64,
    ) {
        // Per-chain cap: drop the smallest counter of this step first.
        let live = self.counters.entry(step_id.to_owned()).or_default().live;
        if live as usize >= self.max_keys_per_step {
            let smallest = self
                .entries
                .keys()
                .filter(|(id, _)| id == step_id)
                .map(|(_, counter)| *counter)
                .min();
            if let Some(smallest) = smallest {
                self.evict(&(step_id.to_owned(), smallest));
            }
        }

        // Global cap: expired entries go first, then the oldest entry overall.
        if self.entries.len() >= self.max_keys {
            self.purge_expired(now_millis);
        }
        if self.entries.len() >= self.max_keys {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.evict(&oldest);
            }
        }
        if self.max_keys == 0 {
            self.counters.entry(step_id.to_owned()).or_default().evicted += 1;
            return;
        }

        self.entries.insert(
            (step_id.to_owned(), counter),
            SkippedEntry {
                seed,
                inserted_at: now_millis,
            },
        );
        self.counters.entry(step_id.to_owned()).or_default().live += 1;
    }

    /// Removes and returns the key for `(step_id, counter)`. Consumption is final: a failed
    /// decrypt with a consumed key does not restore the entry.
    pub fn consume(&mut self, step_id: &str, counter: u32) -> Option<Secret<CHAIN_KEY_SIZE>> {
        let entry = self.entries.remove(&(step_id.to_owned(), counter))?;
        if let Some(counters) = self.counters.get_mut(step_id) {
            counters.live = counters.live.saturating_sub(1);
        }
        Some(entry.seed)
    }

    /// Drops every entry older than the configured TTL.
    pub fn purge_expired(&mut self, now_millis: u64) {
        let expired: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| now_millis.saturating_sub(entry.inserted_at) > self.ttl_millis)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.evict(&key);
        }
    }

    /// Drops every entry belonging to a step, called when the step leaves the ring.
    pub fn purge_for_step(&mut self, step_id: &str) {
        self.entries.retain(|(id, _), _| id != step_id);
        self.counters.remove(step_id);
    }

    fn evict(&mut self, key: &(StepId, u32)) {
        if self.entries.remove(key).is_some() {
            let counters = self.counters.entry(key.0.clone()).or_default();
            counters.live = counters.live.saturating_sub(1);
            counters.evicted += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::Secret;

    use super::SkippedKeyStore;

    fn seed(value: u8) -> Secret<32> {
        Secret::from_bytes([value; 32])
    }

    #[test]
    fn store_consume_is_at_most_once() {
        let mut store = SkippedKeyStore::new(16, 16, 1_000);

        store.store("step-a", 3, seed(3), 100);
        assert!(store.has("step-a", 3));
        assert_eq!(store.len(), 1);

        assert_eq!(store.consume("step-a", 3), Some(seed(3)));
        assert_eq!(store.consume("step-a", 3), None);
        assert!(store.is_empty());

        // A consumed key is not an eviction.
        assert_eq!(store.evictions_for("step-a"), 0);
    }

    #[test]
    fn expired_entries_are_purged_and_counted() {
        let mut store = SkippedKeyStore::new(16, 16, 10);

        store.store("step-a", 1, seed(1), 100);
        store.store("step-a", 2, seed(2), 105);

        store.purge_expired(112);
        assert!(!store.has("step-a", 1));
        assert!(store.has("step-a", 2));
        assert_eq!(store.evictions_for("step-a"), 1);
    }

    #[test]
    fn global_capacity_evicts_oldest_timestamp() {
        let mut store = SkippedKeyStore::new(2, 16, 1_000_000);

        store.store("step-a", 1, seed(1), 100);
        store.store("step-b", 1, seed(2), 200);
        store.store("step-b", 2, seed(3), 300);

        assert_eq!(store.len(), 2);
        assert!(!store.has("step-a", 1));
        assert_eq!(store.evictions_for("step-a"), 1);
        assert_eq!(store.evictions_for("step-b"), 0);
    }

    #[test]
    fn per_step_capacity_evicts_smallest_counter() {
        let mut store = SkippedKeyStore::new(16, 2, 1_000_000);

        store.store("step-a", 5, seed(5), 100);
        store.store("step-a", 3, seed(3), 110);
        store.store("step-a", 9, seed(9), 120);

        assert_eq!(store.len(), 2);
        assert!(!store.has("step-a", 3));
        assert!(store.has("step-a", 5));
        assert!(store.has("step-a", 9));
        assert_eq!(store.evictions_for("step-a"), 1);
    }

    #[test]
    fn purging_a_step_drops_all_its_entries() {
        let mut store = SkippedKeyStore::new(16, 16, 1_000_000);

        store.store("step-a", 1, seed(1), 100);
        store.store("step-a", 2, seed(2), 100);
        store.store("step-b", 1, seed(3), 100);

        store.purge_for_step("step-a");
        assert_eq!(store.len(), 1);
        assert!(store.has("step-b", 1));
    }
}
