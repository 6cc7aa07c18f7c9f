//! Append-only memory event log with a retrievable short-term snapshot.
//!
//! Write failures must never fail the user request; callers go through
//! [`MemoryManager::record`], which logs and swallows internally.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub kind: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

pub struct MemoryManager {
    events: RwLock<HashMap<String, Vec<MemoryEvent>>>,
    snapshot_events: usize,
}

impl MemoryManager {
    pub fn new(snapshot_events: usize) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            snapshot_events: snapshot_events.max(1),
        }
    }

    /// Append an event. Never fails the caller.
    pub fn record(&self, user_id: &str, kind: &str, content: &str) {
        let event = MemoryEvent {
            kind: kind.to_owned(),
            content: content.to_owned(),
            at: Utc::now(),
        };
        self.events
            .write()
            .entry(user_id.to_owned())
            .or_default()
            .push(event);
    }

    /// Recent events, newest last, bounded by the snapshot size.
    pub fn snapshot(&self, user_id: &str) -> Vec<MemoryEvent> {
        let events = self.events.read();
        let Some(log) = events.get(user_id) else {
            return Vec::new();
        };
        let start = log.len().saturating_sub(self.snapshot_events);
        log[start..].to_vec()
    }

    /// Snapshot rendered as prompt context.
    pub fn render_snapshot(&self, user_id: &str) -> String {
        self.snapshot(user_id)
            .iter()
            .map(|e| format!("[{}] {}", e.kind, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self, user_id: &str) {
        self.events.write().remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_bounded_and_recent() {
        let memory = MemoryManager::new(3);
        for i in 0..6 {
            memory.record("u1", "turn", &format!("事件{i}"));
        }
        let snap = memory.snapshot("u1");
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[2].content, "事件5");
    }

    #[test]
    fn unknown_user_snapshot_is_empty() {
        let memory = MemoryManager::new(8);
        assert!(memory.snapshot("nobody").is_empty());
    }
}
