//! The conversation state record and its independently-expiring slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cf_domain::pending::{PendingAction, PendingStatus};
use cf_domain::record::TableRef;
use cf_domain::types::{
    ActiveRecord, LastResult, PaginationCursor, PendingDelete, ReplyPreferences,
};

/// A slot value paired with its own deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expiring<T> {
    pub value: T,
    pub expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    pub fn new(value: T, now: DateTime<Utc>, ttl_secs: u64) -> Self {
        Self {
            value,
            expires_at: now + chrono::Duration::seconds(ttl_secs.max(1) as i64),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A closed pending action retained for diagnostics and follow-ups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: PendingAction,
    pub closed_at: DateTime<Utc>,
}

/// Per-user conversation state. Created lazily, removed when empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_skill: Option<Expiring<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<Expiring<LastResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_table: Option<Expiring<TableRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_record: Option<Expiring<ActiveRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_delete: Option<Expiring<PendingDelete>>,
    /// The pending action carries its own `expires_at`; no wrapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Expiring<PaginationCursor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_preferences: Option<Expiring<ReplyPreferences>>,
    /// Append-only ring of closed pending actions (bounded by the manager).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_action_history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_expires_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// True when every slot is gone — the store drops empty states.
    pub fn is_empty(&self) -> bool {
        self.last_skill.is_none()
            && self.last_result.is_none()
            && self.active_table.is_none()
            && self.active_record.is_none()
            && self.pending_delete.is_none()
            && self.pending_action.is_none()
            && self.pagination.is_none()
            && self.reply_preferences.is_none()
            && self.pending_action_history.is_empty()
    }

    /// Expire every slot whose deadline has passed. Expired pending
    /// actions move to history as `invalidated`. Returns how many slots
    /// were cleared.
    pub fn expire_slots(&mut self, now: DateTime<Utc>, history_limit: usize) -> usize {
        fn expire<T>(slot: &mut Option<Expiring<T>>, now: DateTime<Utc>, cleared: &mut usize) {
            if slot.as_ref().is_some_and(|s| s.is_expired(now)) {
                *slot = None;
                *cleared += 1;
            }
        }

        let mut cleared = 0;
        expire(&mut self.last_skill, now, &mut cleared);
        expire(&mut self.last_result, now, &mut cleared);
        expire(&mut self.active_table, now, &mut cleared);
        expire(&mut self.active_record, now, &mut cleared);
        expire(&mut self.pending_delete, now, &mut cleared);
        expire(&mut self.pagination, now, &mut cleared);
        expire(&mut self.reply_preferences, now, &mut cleared);

        if self
            .pending_action
            .as_ref()
            .is_some_and(|p| p.is_expired(now))
        {
            let mut action = self.pending_action.take().expect("checked above");
            action.status = PendingStatus::Invalidated;
            self.push_history(action, now, history_limit);
            cleared += 1;
        }

        if self.history_expires_at.is_some_and(|at| now > at) {
            self.pending_action_history.clear();
            self.history_expires_at = None;
        }

        cleared
    }

    /// Append to the bounded history ring; oldest entries fall off.
    pub fn push_history(&mut self, action: PendingAction, now: DateTime<Utc>, limit: usize) {
        self.pending_action_history.push(HistoryEntry {
            action,
            closed_at: now,
        });
        let overflow = self.pending_action_history.len().saturating_sub(limit.max(1));
        if overflow > 0 {
            self.pending_action_history.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_domain::pending::{ActionKind, ActionPayload, DeleteSummary};

    fn pending(now: DateTime<Utc>, ttl: i64) -> PendingAction {
        PendingAction::new(
            ActionKind::DeleteRecord,
            ActionPayload::Delete {
                table: TableRef::new("tbl1", "案件项目总库"),
                record_id: "rec1".into(),
                summary: DeleteSummary::default(),
            },
            now,
            ttl,
        )
    }

    #[test]
    fn fresh_state_is_empty() {
        assert!(ConversationState::default().is_empty());
    }

    #[test]
    fn expired_pending_action_moves_to_history_invalidated() {
        let now = Utc::now();
        let mut state = ConversationState {
            pending_action: Some(pending(now, 300)),
            ..Default::default()
        };
        let later = now + chrono::Duration::seconds(301);
        let cleared = state.expire_slots(later, 8);
        assert_eq!(cleared, 1);
        assert!(state.pending_action.is_none());
        assert_eq!(state.pending_action_history.len(), 1);
        assert_eq!(
            state.pending_action_history[0].action.status,
            PendingStatus::Invalidated
        );
    }

    #[test]
    fn history_ring_is_bounded() {
        let now = Utc::now();
        let mut state = ConversationState::default();
        for _ in 0..12 {
            state.push_history(pending(now, 300), now, 8);
        }
        assert_eq!(state.pending_action_history.len(), 8);
    }

    #[test]
    fn unexpired_slots_survive_sweep() {
        let now = Utc::now();
        let mut state = ConversationState {
            last_skill: Some(Expiring::new("QuerySkill".into(), now, 3600)),
            pending_action: Some(pending(now, 300)),
            ..Default::default()
        };
        assert_eq!(state.expire_slots(now + chrono::Duration::seconds(10), 8), 0);
        assert!(state.pending_action.is_some());
    }
}
