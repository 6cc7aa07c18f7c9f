//! The state store seam.
//!
//! The in-memory implementation is the shipped default; the trait admits a
//! network-backed variant. Serialization of the state record is stable
//! (snake_case status strings) so a durable store can round-trip it.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::slots::ConversationState;

pub trait StateStore: Send + Sync {
    fn get(&self, user_id: &str) -> Option<ConversationState>;
    fn set(&self, user_id: &str, state: ConversationState);
    fn delete(&self, user_id: &str);
    fn user_ids(&self) -> Vec<String>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, user_id: &str) -> Option<ConversationState> {
        self.states.read().get(user_id).cloned()
    }

    fn set(&self, user_id: &str, state: ConversationState) {
        if state.is_empty() {
            self.states.write().remove(user_id);
        } else {
            self.states.write().insert(user_id.to_owned(), state);
        }
    }

    fn delete(&self, user_id: &str) {
        self.states.write().remove(user_id);
    }

    fn user_ids(&self) -> Vec<String> {
        self.states.read().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.states.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::Expiring;
    use chrono::Utc;

    #[test]
    fn empty_states_are_dropped_on_set() {
        let store = InMemoryStateStore::new();
        store.set("u1", ConversationState::default());
        assert_eq!(store.len(), 0);

        let state = ConversationState {
            last_skill: Some(Expiring::new("QuerySkill".into(), Utc::now(), 60)),
            ..Default::default()
        };
        store.set("u1", state);
        assert_eq!(store.len(), 1);
        assert!(store.get("u1").is_some());
    }
}
