//! The shared key → entry map with expiry and capacity sweeps.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::entry::{CacheEntry, StoredValue};

/// Process-wide store used by the consumer API.
static GLOBAL_STORE: OnceLock<CacheStore> = OnceLock::new();

/// Inner state protected by the mutex.
#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, CacheEntry<StoredValue>>,

    /// Last sequence number handed to a write.
    last_sequence: u64,
}

/// Shared mapping from string key to [`CacheEntry`].
///
/// Cloning a `CacheStore` yields another handle to the same map. Every
/// operation is synchronous and infallible; the lock is only held for the
/// duration of a single map mutation, never across an await.
///
/// Sweeps are global: a sweep triggered on behalf of one key may expire or
/// evict entries written for any other key.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl CacheStore {
    /// Create an empty, independent store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store, created on first use.
    pub fn global() -> &'static CacheStore {
        GLOBAL_STORE.get_or_init(CacheStore::new)
    }

    /// Look up an entry without any freshness check.
    pub fn get(&self, key: &str) -> Option<CacheEntry<StoredValue>> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Insert or replace the entry for `key`.
    pub fn set(&self, key: impl Into<String>, mut entry: CacheEntry<StoredValue>) {
        let key = key.into();
        let mut inner = self.inner.lock();
        inner.last_sequence += 1;
        entry.sequence = inner.last_sequence;
        inner.entries.insert(key.clone(), entry);

        trace!(key = %key, cache_size = inner.entries.len(), "Entry written");
    }

    /// Write `value` under `key`, fresh for `ttl` from now.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T, ttl: Duration) {
        self.set(key, CacheEntry::new(value, ttl).into_stored());
    }

    /// Remove the entry for `key`. Returns whether one was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Check if `key` has an entry, fresh or not.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Drop expired entries, then evict the oldest writes until at most
    /// `max_items` remain.
    pub fn sweep(&self, max_items: usize) -> SweepStats {
        self.sweep_at(Instant::now(), max_items)
    }

    fn sweep_at(&self, now: Instant, max_items: usize) -> SweepStats {
        let mut inner = self.inner.lock();

        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired_at(now));
        let expired = before - inner.entries.len();

        let mut evicted = 0;
        if inner.entries.len() > max_items {
            let excess = inner.entries.len() - max_items;
            let mut by_age: Vec<(Instant, u64, String)> = inner
                .entries
                .iter()
                .map(|(key, entry)| (entry.written_at, entry.sequence, key.clone()))
                .collect();
            by_age.sort_unstable();

            for (_, _, key) in by_age.into_iter().take(excess) {
                debug!(key = %key, "Evicting oldest entry to respect capacity");
                inner.entries.remove(&key);
                evicted += 1;
            }
        }

        if expired > 0 || evicted > 0 {
            debug!(
                expired,
                evicted,
                max_items,
                cache_size = inner.entries.len(),
                "Cache sweep removed entries"
            );
        }

        SweepStats { expired, evicted }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        debug!(count, "Cache cleared");
    }

    /// Current number of entries.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Keys currently present, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Count fresh and expired entries.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.inner.lock();
        let fresh = inner
            .entries
            .values()
            .filter(|entry| entry.is_fresh_at(now))
            .count();
        CacheStats {
            size: inner.entries.len(),
            fresh,
            expired: inner.entries.len() - fresh,
        }
    }

    /// Spawn a task that sweeps the store every `interval`.
    ///
    /// Controllers sweep after every successful fetch on their own; this is
    /// for long-lived processes where keys stop being fetched and would
    /// otherwise linger until the next write. Abort the returned handle to
    /// stop it. Must be called within a Tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration, max_items: usize) -> JoinHandle<()> {
        let store = self.clone();
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                store.sweep(max_items);
            }
        })
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("size", &self.size())
            .finish()
    }
}

/// What a single sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries dropped because they expired.
    pub expired: usize,

    /// Entries dropped to get back under capacity.
    pub evicted: usize,
}

impl SweepStats {
    /// Total number of entries removed.
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries.
    pub size: usize,

    /// Entries still within their TTL.
    pub fresh: usize,

    /// Entries past their TTL that no sweep has removed yet.
    pub expired: usize,
}
