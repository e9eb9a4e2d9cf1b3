//! Bounded, time-expiring response cache.
//!
//! [`ResponseCache`] is a single tier: a size-bounded map whose entries
//! expire after a fixed TTL. [`CacheTiers`] bundles the two tiers the
//! service uses (whole plans and chat answers).
//!
//! Eviction is oldest-write-first. Reads use `peek`, so they never refresh
//! an entry's position; only `set` does.

pub mod tiers;

pub use tiers::{CacheStats, CacheTiers, ClearedCounts, chat_key, plan_key};

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// One cache tier.
///
/// Lock poisoning is treated as a cache failure: reads miss and writes are
/// dropped. The cache never turns a request into an error.
pub struct ResponseCache<V> {
    name: &'static str,
    ttl: Duration,
    capacity: NonZeroUsize,
    store: Mutex<LruCache<String, CacheEntry<V>>>,
}

impl<V> std::fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<V: Clone> ResponseCache<V> {
    /// Create a tier holding at most `capacity` entries for `ttl` each.
    ///
    /// A zero capacity is bumped to one.
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl,
            capacity,
            store: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Tier name used in logs and stats.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Time-to-live applied to every entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A panic while holding the lock may have left the tier half-updated,
    /// so a poisoned tier is emptied and put back into service.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<V>>> {
        self.store.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(tier = self.name, "cache lock poisoned, clearing tier");
            let mut guard = poisoned.into_inner();
            guard.clear();
            self.store.clear_poison();
            guard
        })
    }

    /// Look up a live entry. Expired entries are removed and count as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut store = self.lock();
        let now = Instant::now();

        match store.peek(key) {
            None => {
                tracing::debug!(tier = self.name, "cache miss");
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                tracing::debug!(tier = self.name, "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        store.pop(key);
        tracing::debug!(tier = self.name, "cache entry expired");
        None
    }

    /// Insert or overwrite an entry, evicting the oldest one when full.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut store = self.lock();
        let key = key.into();
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };

        if let Some((evicted, _)) = store.push(key.clone(), entry) {
            if evicted != key {
                tracing::debug!(tier = self.name, "evicted oldest cache entry");
            }
        }
    }

    /// Remove every entry, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut store = self.lock();
        let count = store.len();
        store.clear();
        count
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut store = self.lock();
        let now = Instant::now();

        // Collect first: the store cannot be mutated while iterating.
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            store.pop(key);
        }
        expired.len()
    }

    /// Number of stored entries, including ones that expired but were not
    /// yet purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the tier holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
