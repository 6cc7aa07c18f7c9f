//! Semantic deduplication of card callbacks.
//!
//! Key = hash of `(user_id, action, canonicalized value)`. A short-TTL
//! seen-set absorbs channel redeliveries; an in-flight guard absorbs the
//! user double-tapping a card while the first tap is still executing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use cf_cache::{Clock, IdempotencyStore};

pub struct CallbackDedupe {
    seen: IdempotencyStore,
    in_flight: Mutex<HashSet<String>>,
}

/// Guard handle: releases the in-flight slot on drop.
pub struct InFlightGuard {
    key: String,
    owner: Arc<CallbackDedupe>,
    /// Marked true when the dispatch succeeded, so the seen-set absorbs
    /// later redeliveries.
    mark_seen: bool,
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("key", &self.key)
            .field("mark_seen", &self.mark_seen)
            .finish()
    }
}

impl InFlightGuard {
    pub fn mark_success(&mut self) {
        self.mark_seen = true;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.mark_seen {
            self.owner.seen.mark(&self.key);
        }
        self.owner.in_flight.lock().remove(&self.key);
    }
}

/// Why a callback was rejected as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    SeenRecently,
    InFlight,
}

impl CallbackDedupe {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: IdempotencyStore::new(4096, ttl, clock),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Canonical key over the callback identity. Key order in `value` is
    /// irrelevant: serde_json maps iterate sorted after canonicalization.
    pub fn key_of(user_id: &str, action: &str, value: &Value) -> String {
        let canonical = canonicalize(value);
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update([0]);
        hasher.update(action.as_bytes());
        hasher.update([0]);
        hasher.update(canonical.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    /// Try to take ownership of this callback. `Err` means a duplicate.
    pub fn acquire(
        self: &Arc<Self>,
        user_id: &str,
        action: &str,
        value: &Value,
    ) -> std::result::Result<InFlightGuard, DuplicateKind> {
        let key = Self::key_of(user_id, action, value);
        if self.seen.is_duplicate(&key) {
            return Err(DuplicateKind::SeenRecently);
        }
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(key.clone()) {
                return Err(DuplicateKind::InFlight);
            }
        }
        Ok(InFlightGuard {
            key,
            owner: self.clone(),
            mark_seen: false,
        })
    }
}

fn canonicalize(value: &Value) -> String {
    // BTreeMap-backed re-serialization gives stable key order.
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or(Value::Null)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_cache::ManualClock;
    use serde_json::json;

    fn dedupe(clock: &ManualClock) -> Arc<CallbackDedupe> {
        Arc::new(CallbackDedupe::new(
            Duration::from_secs(600),
            Arc::new(clock.clone()),
        ))
    }

    #[test]
    fn first_acquire_succeeds_second_blocks_after_success() {
        let clock = ManualClock::new();
        let dedupe = dedupe(&clock);
        let value = json!({ "record_id": "rec1", "table_type": "case" });

        let mut guard = dedupe.acquire("u1", "create_record_confirm", &value).unwrap();
        guard.mark_success();
        drop(guard);

        let err = dedupe
            .acquire("u1", "create_record_confirm", &value)
            .unwrap_err();
        assert_eq!(err, DuplicateKind::SeenRecently);
    }

    #[test]
    fn concurrent_double_tap_is_in_flight() {
        let clock = ManualClock::new();
        let dedupe = dedupe(&clock);
        let value = json!({ "record_id": "rec1" });

        let _guard = dedupe.acquire("u1", "confirm", &value).unwrap();
        let err = dedupe.acquire("u1", "confirm", &value).unwrap_err();
        assert_eq!(err, DuplicateKind::InFlight);
    }

    #[test]
    fn failed_dispatch_does_not_mark_seen() {
        let clock = ManualClock::new();
        let dedupe = dedupe(&clock);
        let value = json!({ "record_id": "rec1" });

        let guard = dedupe.acquire("u1", "confirm", &value).unwrap();
        drop(guard); // no mark_success
        assert!(dedupe.acquire("u1", "confirm", &value).is_ok());
    }

    #[test]
    fn key_is_order_insensitive() {
        let a = CallbackDedupe::key_of("u1", "confirm", &json!({ "a": 1, "b": 2 }));
        let b = CallbackDedupe::key_of("u1", "confirm", &json!({ "b": 2, "a": 1 }));
        assert_eq!(a, b);
    }

    #[test]
    fn seen_entries_age_out() {
        let clock = ManualClock::new();
        let dedupe = dedupe(&clock);
        let value = json!({ "record_id": "rec1" });
        let mut guard = dedupe.acquire("u1", "confirm", &value).unwrap();
        guard.mark_success();
        drop(guard);

        clock.advance(Duration::from_secs(601));
        assert!(dedupe.acquire("u1", "confirm", &value).is_ok());
    }
}
