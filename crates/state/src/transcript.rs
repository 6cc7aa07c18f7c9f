//! In-memory session transcript: a ring of recent user/assistant turns
//! per user, trimmed to a token budget.
//!
//! The transcript feeds LLM context only — it is not on any correctness
//! path, so it keeps its own lock separate from the state store.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use cf_domain::types::Turn;

pub struct TranscriptStore {
    turns: RwLock<HashMap<String, VecDeque<Turn>>>,
    token_budget: usize,
}

impl TranscriptStore {
    pub fn new(token_budget: usize) -> Self {
        Self {
            turns: RwLock::new(HashMap::new()),
            token_budget: token_budget.max(256),
        }
    }

    /// Append a turn and trim the ring to the token budget.
    pub fn append(&self, user_id: &str, role: &str, content: &str) {
        let turn = Turn {
            role: role.to_owned(),
            content: content.to_owned(),
            at: chrono::Utc::now(),
        };
        let mut turns = self.turns.write();
        let ring = turns.entry(user_id.to_owned()).or_default();
        ring.push_back(turn);

        let mut total: usize = ring.iter().map(|t| estimate_tokens(&t.content)).sum();
        while total > self.token_budget && ring.len() > 1 {
            if let Some(dropped) = ring.pop_front() {
                total -= estimate_tokens(&dropped.content);
            }
        }
    }

    pub fn history(&self, user_id: &str) -> Vec<Turn> {
        self.turns
            .read()
            .get(user_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Render the recent history as prompt context lines.
    pub fn render_context(&self, user_id: &str, max_turns: usize) -> String {
        let turns = self.history(user_id);
        let start = turns.len().saturating_sub(max_turns);
        turns[start..]
            .iter()
            .map(|t| format!("{}: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self, user_id: &str) {
        self.turns.write().remove(user_id);
    }

    pub fn user_count(&self) -> usize {
        self.turns.read().len()
    }
}

/// Rough token estimate: CJK characters count as one token each, the
/// remaining bytes as one per four.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other_bytes = 0usize;
    for ch in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&ch) {
            cjk += 1;
        } else {
            other_bytes += ch.len_utf8();
        }
    }
    cjk + other_bytes.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_heavy_text_estimates_per_char() {
        assert_eq!(estimate_tokens("查询案件"), 4);
        assert_eq!(estimate_tokens("abcd"), 1);
    }

    #[test]
    fn append_and_history() {
        let store = TranscriptStore::new(1000);
        store.append("u1", "user", "查所有案件");
        store.append("u1", "assistant", "共 5 条");
        let history = store.history("u1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
    }

    #[test]
    fn trimming_keeps_recent_turns() {
        let store = TranscriptStore::new(256);
        for i in 0..100 {
            store.append("u1", "user", &format!("第{i}条消息，内容足够长来占用预算额度"));
        }
        let history = store.history("u1");
        assert!(history.len() < 100);
        assert!(history.last().unwrap().content.contains("第99条"));
        let total: usize = history.iter().map(|t| estimate_tokens(&t.content)).sum();
        assert!(total <= 256 + 32);
    }

    #[test]
    fn context_rendering_limits_turns() {
        let store = TranscriptStore::new(4000);
        for i in 0..10 {
            store.append("u1", "user", &format!("消息{i}"));
        }
        let ctx = store.render_context("u1", 3);
        assert_eq!(ctx.lines().count(), 3);
        assert!(ctx.contains("消息9"));
    }
}
