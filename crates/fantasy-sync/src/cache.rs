// Cache layer: most recent value per cache key, tagged with fetch time and
// time-to-live.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Default time-to-live for game-state snapshots.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Internal bookkeeping for one cached value.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
    ttl: Duration,
    /// Set by `invalidate`; cleared by the next `set`.
    invalidated: bool,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated && now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// A value read back from the cache, with its freshness at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    /// `true` if the entry is within its TTL and has not been invalidated.
    pub fresh: bool,
    /// How long ago the value was stored.
    pub age: Duration,
}

/// Keyed cache with per-entry TTL.
///
/// Stale entries are kept (never evicted) so callers can fall back to them
/// when a refresh fails. Memory is bounded by the number of distinct keys.
#[derive(Debug)]
pub struct Cache<V> {
    entries: HashMap<String, CacheEntry<V>>,
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V: Clone> Cache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value for `key` with its freshness flag, or `None` if the
    /// key was never populated.
    pub fn get(&self, key: &str) -> Option<Cached<V>> {
        let now = Instant::now();
        self.entries.get(key).map(|entry| Cached {
            value: entry.value.clone(),
            fresh: entry.is_fresh(now),
            age: now.saturating_duration_since(entry.fetched_at),
        })
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn set(&mut self, key: &str, value: V, ttl: Duration) {
        debug!(key, ttl_ms = ttl.as_millis() as u64, "cache set");
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                fetched_at: Instant::now(),
                ttl,
                invalidated: false,
            },
        );
    }

    /// Swap the value stored under `key` without touching its fetch time,
    /// TTL, or invalidation. Returns `false` if the key is not cached.
    pub fn replace_value(&mut self, key: &str, value: V) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }

    /// Mark `key` (or, with `None`, every entry) stale immediately.
    pub fn invalidate(&mut self, key: Option<&str>) {
        match key {
            Some(key) => {
                if let Some(entry) = self.entries.get_mut(key) {
                    entry.invalidated = true;
                    debug!(key, "cache entry invalidated");
                }
            }
            None => {
                for entry in self.entries.values_mut() {
                    entry.invalidated = true;
                }
                debug!(count = self.entries.len(), "all cache entries invalidated");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
