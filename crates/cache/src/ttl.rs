//! Bounded TTL cache.
//!
//! Key → value with per-entry expiry on top of an LRU ring: a `set` past
//! capacity evicts the least-recently-used entry, and `sweep(now)` drops
//! everything whose deadline has passed. All operations are O(1) amortized.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe bounded TTL+LRU cache.
pub struct TtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            default_ttl,
            clock,
        }
    }

    /// Fetch a live value; expired entries are dropped on access.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Membership check that does not refresh recency or extend TTL.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|e| e.expires_at > now)
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL (overrides the default).
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.entries.lock().put(key, Entry { value, expires_at });
    }

    pub fn delete(&self, key: &K) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Evict every entry with `expires_at <= now`. Returns the count.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            entries.pop(&key);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(capacity: usize, ttl_secs: u64) -> (TtlCache<String, String>, ManualClock) {
        let clock = ManualClock::new();
        let cache = TtlCache::new(
            capacity,
            Duration::from_secs(ttl_secs),
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn get_set_roundtrip() {
        let (cache, _clock) = cache(8, 60);
        cache.set("k".into(), "v".into());
        assert_eq!(cache.get(&"k".into()), Some("v".into()));
    }

    #[test]
    fn entries_expire() {
        let (cache, clock) = cache(8, 60);
        cache.set("k".into(), "v".into());
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get(&"k".into()), None);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let (cache, clock) = cache(8, 60);
        cache.set_with_ttl("short".into(), "v".into(), Duration::from_secs(5));
        cache.set("long".into(), "v".into());
        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get(&"short".into()), None);
        assert_eq!(cache.get(&"long".into()), Some("v".into()));
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let (cache, _clock) = cache(2, 60);
        cache.set("a".into(), "1".into());
        cache.set("b".into(), "2".into());
        // Touch "a" so "b" becomes the eviction candidate.
        let _ = cache.get(&"a".into());
        cache.set("c".into(), "3".into());
        assert_eq!(cache.get(&"b".into()), None);
        assert_eq!(cache.get(&"a".into()), Some("1".into()));
        assert_eq!(cache.get(&"c".into()), Some("3".into()));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (cache, clock) = cache(8, 60);
        cache.set_with_ttl("old".into(), "v".into(), Duration::from_secs(5));
        cache.set("new".into(), "v".into());
        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&"new".into()));
    }

    #[test]
    fn contains_does_not_refresh_recency() {
        let (cache, _clock) = cache(2, 60);
        cache.set("a".into(), "1".into());
        cache.set("b".into(), "2".into());
        // Peek at "a" — must NOT promote it.
        assert!(cache.contains(&"a".into()));
        cache.set("c".into(), "3".into());
        // "a" was still least-recently-used, so it was evicted.
        assert_eq!(cache.get(&"a".into()), None);
    }
}
