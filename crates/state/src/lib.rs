//! Per-user conversation state: the slot model, the store seam, the
//! slot-level manager (sole writer of all slots), the session transcript
//! ring, and the short-term memory log.

pub mod manager;
pub mod memory;
pub mod slots;
pub mod store;
pub mod transcript;

pub use manager::StateManager;
pub use memory::{MemoryEvent, MemoryManager};
pub use slots::{ConversationState, Expiring, HistoryEntry};
pub use store::{InMemoryStateStore, StateStore};
pub use transcript::TranscriptStore;

use chrono::{DateTime, Utc};

/// Wall-clock seam so slot expiry is testable.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production time source.
#[derive(Debug, Clone, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test time source that only moves when told to.
#[derive(Clone)]
pub struct ManualTime {
    now: std::sync::Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

impl ManualTime {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock();
        *now += chrono::Duration::seconds(secs);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
