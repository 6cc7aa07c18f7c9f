//! Short-TTL "seen key" sets for inbound event IDs and business hashes.
//!
//! Stores are monotonic: keys are never explicitly deleted, they only age
//! out. `is_duplicate` checks membership without extending the TTL, so a
//! steady stream of duplicates cannot keep a key alive forever.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::ttl::TtlCache;

/// A TTL membership set.
pub struct IdempotencyStore {
    seen: TtlCache<String, ()>,
}

impl IdempotencyStore {
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: TtlCache::new(capacity, ttl, clock),
        }
    }

    /// Membership check. Does not insert and does not extend the TTL.
    pub fn is_duplicate(&self, key: &str) -> bool {
        self.seen.contains(&key.to_owned())
    }

    /// Record a key with the store's TTL.
    pub fn mark(&self, key: &str) {
        self.seen.set(key.to_owned(), ());
    }

    /// Combined check-and-mark for single-step callers. Returns `true`
    /// when the key was already present (duplicate).
    pub fn check_and_mark(&self, key: &str) -> bool {
        if self.is_duplicate(key) {
            return true;
        }
        self.mark(key);
        false
    }

    pub fn sweep(&self) -> usize {
        self.seen.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store(ttl_secs: u64) -> (IdempotencyStore, ManualClock) {
        let clock = ManualClock::new();
        let store = IdempotencyStore::new(
            1024,
            Duration::from_secs(ttl_secs),
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    #[test]
    fn mark_then_duplicate() {
        let (store, _clock) = store(600);
        assert!(!store.is_duplicate("evt-1"));
        store.mark("evt-1");
        assert!(store.is_duplicate("evt-1"));
    }

    #[test]
    fn keys_age_out() {
        let (store, clock) = store(600);
        store.mark("evt-1");
        clock.advance(Duration::from_secs(601));
        assert!(!store.is_duplicate("evt-1"));
    }

    #[test]
    fn duplicate_checks_do_not_extend_ttl() {
        let (store, clock) = store(600);
        store.mark("evt-1");
        clock.advance(Duration::from_secs(400));
        assert!(store.is_duplicate("evt-1"));
        clock.advance(Duration::from_secs(201));
        // 601 s after the mark the key is gone, repeated checks or not.
        assert!(!store.is_duplicate("evt-1"));
    }

    #[test]
    fn check_and_mark_is_first_writer_wins() {
        let (store, _clock) = store(600);
        assert!(!store.check_and_mark("biz-hash"));
        assert!(store.check_and_mark("biz-hash"));
    }
}
