//! Counting Key Set
//!
//! A set that tolerates repeated insertion, typically used as an advisory
//! task lock that several holders can take for the same key.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

/// Reentrant set: each `add` must be matched by a `remove` before the key
/// leaves the set.
#[derive(Debug)]
pub struct CountingKeySet<K> {
    counts: RwLock<HashMap<K, u32>>,
}

impl<K: Eq + Hash> CountingKeySet<K> {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Takes one hold on `key`, inserting it with a count of 1 if absent.
    pub fn add(&self, key: K) {
        let mut counts = self.counts.write();
        let count = counts.entry(key).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Releases one hold on `key`; the key is dropped once no holds remain.
    /// Removing an absent key does nothing.
    pub fn remove(&self, key: &K) {
        let mut counts = self.counts.write();
        if let Some(count) = counts.get_mut(key) {
            if *count <= 1 {
                counts.remove(key);
            } else {
                *count -= 1;
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.counts.read().contains_key(key)
    }

    /// Number of outstanding holds on `key`.
    pub fn count(&self, key: &K) -> u32 {
        self.counts.read().get(key).copied().unwrap_or(0)
    }

    /// Number of distinct keys held.
    pub fn len(&self) -> usize {
        self.counts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.read().is_empty()
    }
}

impl<K: Eq + Hash> Default for CountingKeySet<K> {
    fn default() -> Self {
        Self::new()
    }
}
