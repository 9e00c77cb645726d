//! Cache Store Module
//!
//! Main cache engine combining the value map with access tracking, expiry
//! timers and single-flight loading.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use crate::cache::{AccessTracker, CacheStats, SingleFlight, StatsRecorder};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::tasks::{Arm, ExpiryScheduler};

// == Cache ==
/// Concurrent bounded cache with TTL expiration, LRU-like eviction and
/// stampede protection.
///
/// `Cache` is a cheap handle; clones share the same storage. All operations
/// must run inside a tokio runtime, since recency updates and expiry timers
/// are spawned as background tasks.
///
/// `E` is the error type produced by loaders passed to
/// [`load_or_store`](Cache::load_or_store).
///
/// # Consistency
///
/// The value map, the access tracker and the timer registry are locked
/// independently. Recency is recorded asynchronously, so eviction picks the
/// least recently used key as far as the tracker knows at that moment. A new
/// entry is admitted before its victim is evicted, so the cache can briefly
/// hold more than `capacity` entries while stores are in progress.
pub struct Cache<K, V, E = CacheError> {
    inner: Arc<Inner<K, V, E>>,
}

struct Inner<K, V, E> {
    /// Key-value storage
    entries: RwLock<HashMap<K, V>>,
    /// Last access per key, for victim selection
    tracker: RwLock<AccessTracker<K>>,
    /// Per-key TTL timers
    expiry: ExpiryScheduler<K>,
    /// In-flight loader runs
    flights: SingleFlight<K, V, E>,
    /// Performance statistics
    stats: StatsRecorder,
    config: CacheConfig,
}

impl<K, V, E> Cache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache holding at most `capacity` entries (minimum 3).
    ///
    /// A `ttl` of zero disables expiration.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_config(CacheConfig::new(capacity, ttl))
    }

    /// Creates a cache from a [`CacheConfig`].
    pub fn with_config(config: CacheConfig) -> Self {
        let config = CacheConfig::new(config.capacity, config.ttl);
        info!(capacity = config.capacity, ttl = ?config.ttl, "cache created");

        // One spare slot for the entry admitted ahead of its eviction
        let slots = config.capacity.saturating_add(1);
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::with_capacity(slots)),
                tracker: RwLock::new(AccessTracker::with_capacity(slots)),
                expiry: ExpiryScheduler::new(config.ttl),
                flights: SingleFlight::new(),
                stats: StatsRecorder::default(),
                config,
            }),
        }
    }

    // == Store ==
    /// Stores a key-value pair, replacing any previous value.
    ///
    /// When `key` is new and the cache is full, the least recently used entry
    /// is evicted after the new value is in place. With a TTL configured, a
    /// new key gets a timer for the full TTL; a key that already has one has
    /// its deadline moved to `ttl / 2` from now.
    pub async fn store(&self, key: K, value: V) {
        let is_new = {
            let mut entries = self.inner.entries.write().await;
            let is_new = entries.insert(key.clone(), value).is_none();
            // Armed under the write lock so a firing timer sees this store
            if self.inner.config.expires() {
                self.arm_expiry(&key);
            }
            is_new
        };

        if is_new {
            self.inner.evict_overflow(&key).await;
        }

        self.refresh(key);
    }

    // == Load ==
    /// Retrieves a clone of the value stored for `key`.
    ///
    /// A hit refreshes the key's recency in the background.
    pub async fn load(&self, key: &K) -> Option<V> {
        let value = self.inner.entries.read().await.get(key).cloned();

        match value {
            Some(_) => {
                self.inner.stats.record_hit();
                self.refresh(key.clone());
            }
            None => self.inner.stats.record_miss(),
        }
        value
    }

    // == Load Or Store ==
    /// Returns the value for `key`, computing it with `loader` on a miss.
    ///
    /// Concurrent misses on the same key run `loader` once; every caller
    /// gets the same value or the same error. A successful result is stored
    /// before the waiters are released. Errors are never cached.
    ///
    /// There is no built-in timeout. Dropping the call is safe: if the
    /// caller running the loader goes away, a waiting caller takes over.
    pub async fn load_or_store<F, Fut>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.load(&key).await {
            return Ok(value);
        }

        self.inner
            .flights
            .run(&key, || self.fill(&key, loader))
            .await
    }

    /// Leader side of [`load_or_store`](Cache::load_or_store).
    async fn fill<F, Fut>(&self, key: &K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // A flight that landed just before this one may have filled it
        let cached = self.inner.entries.read().await.get(key).cloned();
        if let Some(value) = cached {
            self.inner.stats.record_hit();
            self.refresh(key.clone());
            return Ok(value);
        }

        let result = loader().await;
        self.inner.stats.record_load(result.is_err());
        match &result {
            Ok(value) => self.store(key.clone(), value.clone()).await,
            Err(_) => debug!("loader failed, nothing cached"),
        }
        result
    }

    // == Delete ==
    /// Removes an entry, its access record and its expiry timer.
    ///
    /// Deleting an absent key is a no-op.
    pub async fn delete(&self, key: &K) {
        self.inner.discard(key).await;
    }

    // == Clear ==
    /// Removes every entry, access record and expiry timer.
    pub async fn clear(&self) {
        let capacity = self.inner.config.capacity.saturating_add(1);
        {
            let mut entries = self.inner.entries.write().await;
            entries.clear();
            entries.shrink_to(capacity);
        }
        self.inner.tracker.write().await.clear(capacity);
        self.inner.expiry.disarm_all();
        debug!("cache cleared");
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    /// Returns true if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let total_entries = self.len().await;
        self.inner.stats.snapshot(total_entries)
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.inner.config.ttl
    }

    /// Records an access to `key` without waiting for it to land.
    fn refresh(&self, key: K) {
        let inner = Arc::clone(&self.inner);
        let at = Instant::now();
        tokio::spawn(async move {
            inner.touch(key, at).await;
        });
    }

    fn arm_expiry(&self, key: &K) {
        let inner = Arc::downgrade(&self.inner);
        let expired = key.clone();

        let arm = self.inner.expiry.arm(key, move |timer| async move {
            if let Some(inner) = inner.upgrade() {
                inner.expire(&expired, timer).await;
            }
        });
        match arm {
            Arm::Armed => trace!("expiry timer armed"),
            Arm::Refreshed => trace!("expiry timer moved to half ttl"),
        }
    }

    #[cfg(test)]
    async fn tracked(&self, key: &K) -> bool {
        self.inner.tracker.read().await.contains(key)
    }

    #[cfg(test)]
    async fn tracked_len(&self) -> usize {
        self.inner.tracker.read().await.len()
    }

    #[cfg(test)]
    fn timers(&self) -> usize {
        self.inner.expiry.len()
    }
}

impl<K, V, E> Inner<K, V, E>
where
    K: Eq + Hash + Clone,
{
    /// Evicts entries until the cache is back within capacity, never
    /// choosing `key` itself.
    ///
    /// Victims come from the tracker's least recently used key. When the
    /// tracker has nothing to offer yet, any other live key is taken.
    async fn evict_overflow(&self, key: &K) {
        loop {
            let fallback = {
                let entries = self.entries.read().await;
                if entries.len() <= self.config.capacity {
                    return;
                }
                entries.keys().find(|candidate| *candidate != key).cloned()
            };

            let oldest = self.tracker.read().await.oldest(key);
            let Some(victim) = oldest.or(fallback) else {
                return;
            };

            // A stale tracker record only drops the record, so the loop
            // still makes progress.
            if self.discard(&victim).await {
                self.stats.record_eviction();
                debug!("evicted least recently used entry");
            }
        }
    }

    /// Applies a recency update, unless the key has been removed meanwhile.
    async fn touch(&self, key: K, at: Instant) {
        let entries = self.entries.read().await;
        if entries.contains_key(&key) {
            self.tracker.write().await.touch(key, at);
            trace!("recency updated");
        }
    }

    /// Removes `key` everywhere. Returns whether an entry was present.
    async fn discard(&self, key: &K) -> bool {
        let removed = {
            let mut entries = self.entries.write().await;
            self.expiry.disarm(key);
            entries.remove(key).is_some()
        };
        self.tracker.write().await.remove(key);
        removed
    }

    /// Runs when the timer `timer` for `key` fires.
    ///
    /// A store that re-armed the key after this timer fired owns the entry
    /// now, so it is left in place.
    async fn expire(&self, key: &K, timer: u64) {
        let removed = {
            let mut entries = self.entries.write().await;
            // Not `disarm`: that would abort the task running this.
            if !self.expiry.retire(key, timer) {
                trace!("expiry superseded by a newer timer");
                return;
            }
            entries.remove(key).is_some()
        };
        self.tracker.write().await.remove(key);
        if removed {
            self.stats.record_expiration();
            debug!("entry expired");
        }
    }
}

impl<K, V, E> Clone for Cache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> fmt::Debug for Cache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("capacity", &self.inner.config.capacity)
            .field("ttl", &self.inner.config.ttl)
            .finish_non_exhaustive()
    }
}
