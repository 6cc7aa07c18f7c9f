//! Slot-level state manager — the sole writer of conversation state.
//!
//! Every operation loads the state, expires stale slots (appending expired
//! pending actions to history), mutates its target slot, and writes back.
//! Skills never touch the store directly; they read snapshots taken at
//! request start and describe slot changes through their results.
//!
//! Known constraint: `query_list_navigation` pseudo-actions share the
//! pending slot with mutation proposals, so setting one replaces the
//! other (the loser lands in history as `invalidated`). This is
//! intentional — navigation buttons expire alongside the result they
//! refer to.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use cf_domain::config::StateConfig;
use cf_domain::pending::{OperationEntry, PendingAction, PendingStatus};
use cf_domain::record::TableRef;
use cf_domain::types::{
    ActiveRecord, LastResult, PaginationCursor, PendingDelete, ReplyPreferences,
};
use cf_domain::{Error, Result};

use crate::slots::{ConversationState, Expiring, HistoryEntry};
use crate::store::StateStore;
use crate::TimeSource;

pub struct StateManager {
    store: Arc<dyn StateStore>,
    time: Arc<dyn TimeSource>,
    cfg: StateConfig,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>, time: Arc<dyn TimeSource>, cfg: StateConfig) -> Self {
        Self { store, time, cfg }
    }

    fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Load a user's state with expired slots pruned (and persisted).
    pub fn state_of(&self, user_id: &str) -> ConversationState {
        let now = self.now();
        let mut state = self.store.get(user_id).unwrap_or_default();
        if state.expire_slots(now, self.cfg.pending_history_size) > 0 {
            self.store.set(user_id, state.clone());
        }
        state
    }

    /// Apply one mutation under the load → expire → mutate → write cycle.
    fn update<R>(
        &self,
        user_id: &str,
        mutate: impl FnOnce(&mut ConversationState, DateTime<Utc>) -> R,
    ) -> R {
        let now = self.now();
        let mut state = self.store.get(user_id).unwrap_or_default();
        state.expire_slots(now, self.cfg.pending_history_size);
        let result = mutate(&mut state, now);
        state.history_expires_at =
            Some(now + chrono::Duration::seconds(self.cfg.session_ttl_secs as i64));
        self.store.set(user_id, state);
        result
    }

    // ── pending action ───────────────────────────────────────────────

    /// Install a pending action, replacing any live one (which moves to
    /// history as `invalidated`). At most one pending action per user.
    pub fn set_pending_action(&self, user_id: &str, action: PendingAction) {
        let history_limit = self.cfg.pending_history_size;
        self.update(user_id, |state, now| {
            if let Some(mut old) = state.pending_action.take() {
                tracing::debug!(
                    user_id,
                    replaced = old.action.as_str(),
                    new = action.action.as_str(),
                    "pending action replaced"
                );
                old.status = PendingStatus::Invalidated;
                state.push_history(old, now, history_limit);
            }
            state.pending_action = Some(action);
        });
    }

    /// The live pending action, if any. Expired actions were already
    /// auto-invalidated by the expiry pass.
    pub fn pending_action(&self, user_id: &str) -> Option<PendingAction> {
        self.state_of(user_id).pending_action
    }

    /// Transition the pending action to `executed` and move it to history.
    pub fn confirm_pending_action(&self, user_id: &str) -> Result<PendingAction> {
        self.close_pending(user_id, PendingStatus::Executed)
    }

    /// Transition the pending action to `invalidated` and move it to history.
    pub fn cancel_pending_action(&self, user_id: &str) -> Result<PendingAction> {
        self.close_pending(user_id, PendingStatus::Invalidated)
    }

    fn close_pending(&self, user_id: &str, status: PendingStatus) -> Result<PendingAction> {
        let history_limit = self.cfg.pending_history_size;
        self.update(user_id, |state, now| {
            let mut action = state
                .pending_action
                .take()
                .ok_or_else(|| Error::PendingActionNotFound(user_id.to_owned()))?;
            action.status = status;
            let closed = action.clone();
            state.push_history(action, now, history_limit);
            Ok(closed)
        })
    }

    /// Persist updated batch operation statuses without closing the slot.
    /// Used after every entry of a batch commit so a crash between entries
    /// never loses progress.
    pub fn update_pending_action_operations(
        &self,
        user_id: &str,
        operations: Vec<OperationEntry>,
    ) -> Result<()> {
        self.update(user_id, |state, _now| {
            let action = state
                .pending_action
                .as_mut()
                .ok_or_else(|| Error::PendingActionNotFound(user_id.to_owned()))?;
            action.operations = operations;
            Ok(())
        })
    }

    /// Refresh the live pending action wholesale (retry resets).
    pub fn replace_pending_action(&self, user_id: &str, action: PendingAction) -> Result<()> {
        self.update(user_id, |state, _now| {
            if state.pending_action.is_none() {
                return Err(Error::PendingActionNotFound(user_id.to_owned()));
            }
            state.pending_action = Some(action);
            Ok(())
        })
    }

    pub fn pending_history(&self, user_id: &str) -> Vec<HistoryEntry> {
        self.state_of(user_id).pending_action_history
    }

    // ── other slots ──────────────────────────────────────────────────

    pub fn set_last_skill(&self, user_id: &str, skill: &str) {
        let ttl = self.cfg.session_ttl_secs;
        self.update(user_id, |state, now| {
            state.last_skill = Some(Expiring::new(skill.to_owned(), now, ttl));
        });
    }

    pub fn set_last_result(&self, user_id: &str, last: LastResult) {
        let ttl = self.cfg.last_result_ttl_secs;
        self.update(user_id, |state, now| {
            state.last_result = Some(Expiring::new(last, now, ttl));
        });
    }

    pub fn set_active_table(&self, user_id: &str, table: TableRef) {
        let ttl = self.cfg.session_ttl_secs;
        self.update(user_id, |state, now| {
            state.active_table = Some(Expiring::new(table, now, ttl));
        });
    }

    pub fn set_active_record(&self, user_id: &str, record: ActiveRecord) {
        let ttl = self.cfg.session_ttl_secs;
        self.update(user_id, |state, now| {
            state.active_record = Some(Expiring::new(record, now, ttl));
        });
    }

    pub fn set_pagination(&self, user_id: &str, cursor: PaginationCursor) {
        let ttl = self.cfg.last_result_ttl_secs;
        self.update(user_id, |state, now| {
            state.pagination = Some(Expiring::new(cursor, now, ttl));
        });
    }

    pub fn clear_pagination(&self, user_id: &str) {
        self.update(user_id, |state, _now| {
            state.pagination = None;
        });
    }

    pub fn set_pending_delete(&self, user_id: &str, pending: PendingDelete) {
        let ttl = self.cfg.pending_action_ttl_secs;
        self.update(user_id, |state, now| {
            state.pending_delete = Some(Expiring::new(pending, now, ttl));
        });
    }

    pub fn clear_pending_delete(&self, user_id: &str) {
        self.update(user_id, |state, _now| {
            state.pending_delete = None;
        });
    }

    pub fn set_reply_preferences(&self, user_id: &str, prefs: ReplyPreferences) {
        let ttl = self.cfg.session_ttl_secs;
        self.update(user_id, |state, now| {
            state.reply_preferences = Some(Expiring::new(prefs, now, ttl));
        });
    }

    pub fn clear_user(&self, user_id: &str) {
        self.store.delete(user_id);
    }

    // ── maintenance ──────────────────────────────────────────────────

    /// Sweep every user's expired slots; drops users whose state emptied.
    /// Returns the live user count (the `active_sessions` gauge value).
    pub fn sweep(&self) -> usize {
        for user_id in self.store.user_ids() {
            let now = self.now();
            if let Some(mut state) = self.store.get(&user_id) {
                state.expire_slots(now, self.cfg.pending_history_size);
                self.store.set(&user_id, state);
            }
        }
        self.store.len()
    }

    pub fn config(&self) -> &StateConfig {
        &self.cfg
    }

    /// Default pending-action TTL in seconds (caller-overridable per
    /// proposal).
    pub fn pending_ttl_secs(&self) -> u64 {
        self.cfg.pending_action_ttl_secs
    }
}
