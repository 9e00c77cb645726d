//! LRU Tracker Module
//!
//! Records the last access time of every live key so that a least recently
//! used victim can be picked when the cache is full.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

// == Access Tracker ==
/// Parallel index of last-access timestamps, consulted only for eviction.
///
/// Victim selection is a linear scan for the smallest timestamp. Ties go to
/// whichever key the map yields first, which is arbitrary.
#[derive(Debug)]
pub struct AccessTracker<K> {
    last_access: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> AccessTracker<K> {
    // == Constructor ==
    /// Creates an empty tracker pre-sized for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            last_access: HashMap::with_capacity(capacity),
        }
    }

    // == Touch ==
    /// Records an access to `key` at `at`.
    ///
    /// Updates are applied out of band, so an older timestamp arriving late
    /// never moves a key backwards.
    pub fn touch(&mut self, key: K, at: Instant) {
        self.last_access
            .entry(key)
            .and_modify(|seen| *seen = (*seen).max(at))
            .or_insert(at);
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &K) {
        self.last_access.remove(key);
    }

    // == Oldest ==
    /// Returns the least recently accessed key, skipping `except`.
    pub fn oldest(&self, except: &K) -> Option<K> {
        self.last_access
            .iter()
            .filter(|(key, _)| *key != except)
            .min_by_key(|(_, at)| **at)
            .map(|(key, _)| key.clone())
    }

    // == Clear ==
    /// Drops every record and shrinks the backing map to `capacity`.
    pub fn clear(&mut self, capacity: usize) {
        self.last_access.clear();
        self.last_access.shrink_to(capacity);
    }

    pub fn len(&self) -> usize {
        self.last_access.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_access.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.last_access.contains_key(key)
    }
}
