//! Cache entries and the type-erased payload stored in the shared map.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Payload type held by [`CacheStore`](crate::CacheStore).
///
/// Different controllers store different value types under different keys in
/// the same map, so the store only sees `dyn Any`.
pub type StoredValue = Arc<dyn Any + Send + Sync>;

/// Upper bound used when `written_at + ttl` would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Entry stored in the cache.
///
/// An entry is never updated in place: every write replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Last known value for the key.
    pub data: V,

    /// When this entry was written.
    pub written_at: Instant,

    /// When this entry stops being fresh (`written_at + ttl`).
    pub expires_at: Instant,

    /// Write order assigned by the store. Breaks ties between entries that
    /// share a `written_at`.
    pub(crate) sequence: u64,
}

impl<V> CacheEntry<V> {
    /// Create an entry written now that stays fresh for `ttl`.
    pub fn new(data: V, ttl: Duration) -> Self {
        Self::written_at(data, Instant::now(), ttl)
    }

    /// Create an entry with an explicit write time.
    pub fn written_at(data: V, written_at: Instant, ttl: Duration) -> Self {
        let expires_at = written_at
            .checked_add(ttl)
            .unwrap_or_else(|| written_at + FAR_FUTURE);
        Self {
            data,
            written_at,
            expires_at,
            sequence: 0,
        }
    }

    /// Whether the entry is still fresh at `now`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Whether the entry is still fresh.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    /// Whether a sweep at `now` removes this entry.
    ///
    /// Note this is strict: an entry whose expiry is exactly `now` is no longer
    /// fresh but survives the sweep.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at < now
    }

    /// Erase the payload type so the entry can go into the shared store.
    pub fn into_stored(self) -> CacheEntry<StoredValue>
    where
        V: Any + Send + Sync,
    {
        CacheEntry {
            data: Arc::new(self.data),
            written_at: self.written_at,
            expires_at: self.expires_at,
            sequence: self.sequence,
        }
    }
}

impl CacheEntry<StoredValue> {
    /// Recover a typed view of the entry.
    ///
    /// Returns `None` when the payload is not a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<CacheEntry<Arc<T>>> {
        let data = Arc::clone(&self.data).downcast::<T>().ok()?;
        Some(CacheEntry {
            data,
            written_at: self.written_at,
            expires_at: self.expires_at,
            sequence: self.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_freshness_boundary() {
        let entry = CacheEntry::new(1u32, Duration::from_millis(100));
        assert!(entry.is_fresh());

        tokio::time::advance(Duration::from_millis(100)).await;

        // Exactly at expiry: no longer fresh, but not yet swept.
        let now = Instant::now();
        assert!(!entry.is_fresh_at(now));
        assert!(!entry.is_expired_at(now));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired_at(Instant::now()));
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let entry = CacheEntry::new("x", Duration::MAX);
        assert!(entry.expires_at >= entry.written_at);
        assert!(entry.is_fresh());
    }

    #[tokio::test]
    async fn test_downcast() {
        let stored = CacheEntry::new(String::from("gold"), Duration::from_secs(1)).into_stored();

        let typed = stored.downcast::<String>().unwrap();
        assert_eq!(typed.data.as_str(), "gold");
        assert_eq!(typed.expires_at, stored.expires_at);

        assert!(stored.downcast::<u64>().is_none());
    }
}
