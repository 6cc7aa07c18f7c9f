use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation state TTLs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// TTL for session-lifetime slots (last_skill, active_table,
    /// active_record, reply_preferences, history).
    #[serde(default = "d_session_ttl")]
    pub session_ttl_secs: u64,
    /// `last_result` and `pagination` slots.
    #[serde(default = "d_600")]
    pub last_result_ttl_secs: u64,
    /// `pending_action` and `pending_delete` slots; proposal callers may
    /// override per action.
    #[serde(default = "d_300")]
    pub pending_action_ttl_secs: u64,
    /// Bounded pending-action history ring per user.
    #[serde(default = "d_8")]
    pub pending_history_size: usize,
    /// Transcript token budget per user (turns beyond it are trimmed).
    #[serde(default = "d_transcript_budget")]
    pub transcript_token_budget: usize,
    /// Short-term memory snapshot size (events).
    #[serde(default = "d_32")]
    pub memory_snapshot_events: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: d_session_ttl(),
            last_result_ttl_secs: 600,
            pending_action_ttl_secs: 300,
            pending_history_size: 8,
            transcript_token_budget: d_transcript_budget(),
            memory_snapshot_events: 32,
        }
    }
}

fn d_session_ttl() -> u64 {
    3600
}
fn d_600() -> u64 {
    600
}
fn d_300() -> u64 {
    300
}
fn d_8() -> usize {
    8
}
fn d_transcript_budget() -> usize {
    3800
}
fn d_32() -> usize {
    32
}
