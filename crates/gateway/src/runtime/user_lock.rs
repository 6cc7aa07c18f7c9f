//! Per-user concurrency control.
//!
//! One logical worker handles one message or callback per user from start
//! to finish: each user key maps to a `Semaphore(1)`, acquired as the
//! first step of the pipeline and released (on drop) as the last. This
//! serialization is the correctness guarantee for the pending-action
//! invariants — a callback can never interleave with a proposal from the
//! same user.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct UserLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for UserLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl UserLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a user; waits while a request is in flight.
    /// Hold the permit for the duration of the request.
    pub async fn acquire(&self, user_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(user_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("user lock semaphore never closes")
    }

    pub fn user_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop idle entries so the map does not grow without bound.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
