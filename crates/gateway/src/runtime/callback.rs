//! Card-callback handling: the commit half of the confirmation protocol.
//!
//! Consumes `{user_id, callback_action, value}` events, guards them with
//! semantic dedup, validates them against the live pending action, and
//! dispatches confirm / cancel / retry — sequentially for batches, with
//! per-entry persistence and the failed→skipped cascade.

use serde_json::Value;
use sha2::{Digest, Sha256};

use cf_domain::messages::{batch_message, batch_retry_hint, user_message};
use cf_domain::metric::MetricEvent;
use cf_domain::pending::{
    ActionKind, ActionPayload, OperationStatus, PendingAction,
};
use cf_domain::types::{
    ActiveRecord, BatchOutcome, RenderedResponse, SkillContext, SkillData, SkillResult,
};

use crate::runtime::pipeline::sync_state;
use crate::state::AppState;

/// Normalized callback event from the channel adapter.
#[derive(Debug, Clone, Default)]
pub struct CallbackInput {
    pub open_id: String,
    pub user_name: String,
    pub callback_action: String,
    /// Originally-proposed identifiers plus free-form extras.
    pub value: Value,
    pub chat_id: Option<String>,
    pub is_group_chat: bool,
}

impl CallbackInput {
    pub fn user_key(&self) -> String {
        match (&self.chat_id, self.is_group_chat) {
            (Some(chat_id), true) => {
                format!("channel:group:{chat_id}:user:{}", self.open_id)
            }
            _ => self.open_id.clone(),
        }
    }
}

/// Progress events for long batches (≥ 3 operations).
#[derive(Debug, Clone)]
pub enum BatchProgress {
    Start { total: usize },
    Complete { succeeded: usize, failed: usize },
}

/// Sink for batch progress events; the adapter may stream them to the
/// chat while the batch runs.
pub trait ProgressEmitter: Send + Sync {
    fn emit(&self, user_id: &str, event: BatchProgress);
}

fn expired_response() -> RenderedResponse {
    RenderedResponse::text(user_message("pending_action_expired"))
}

/// Entry point. Any internal failure degrades to the expired-shape
/// response — a card must never hang waiting on us.
pub async fn handle_callback(
    state: &AppState,
    input: CallbackInput,
    progress: Option<&dyn ProgressEmitter>,
) -> RenderedResponse {
    let user_id = input.user_key();
    let callback = input.callback_action.trim().to_lowercase();

    let _lock = state.user_locks.acquire(&user_id).await;

    // Semantic dedup before any dispatch.
    let mut guard = match state
        .callback_dedupe
        .acquire(&user_id, &callback, &input.value)
    {
        Ok(guard) => guard,
        Err(kind) => {
            MetricEvent::CallbackDuplicated {
                user_id: user_id.clone(),
                action: callback.clone(),
            }
            .emit();
            tracing::info!(
                user_id = %user_id,
                callback = %callback,
                kind = ?kind,
                "duplicate callback short-circuited"
            );
            return RenderedResponse::text(user_message("callback_processed"));
        }
    };

    match dispatch(state, &user_id, &callback, &input, progress).await {
        Ok(rendered) => {
            guard.mark_success();
            rendered
        }
        Err(e) => {
            // Uncaught failure: log and return the expired shape — the
            // card must never hang.
            tracing::warn!(user_id = %user_id, callback = %callback, error = %e, "callback dispatch failed");
            expired_response()
        }
    }
}

async fn dispatch(
    state: &AppState,
    user_id: &str,
    callback: &str,
    input: &CallbackInput,
    progress: Option<&dyn ProgressEmitter>,
) -> cf_domain::Result<RenderedResponse> {
    // Edit buttons open the update guide instead of committing anything.
    if matches!(callback, "edit" | "modify" | "update_record_edit") {
        return Ok(handle_edit(state, user_id, input).await);
    }

    let Some(pending) = state.states.pending_action(user_id) else {
        tracing::info!(user_id = %user_id, callback = %callback, "callback without pending action");
        return Ok(expired_response());
    };

    // Navigation pseudo-actions handle their own callback names.
    if pending.action == ActionKind::QueryListNavigation {
        return Ok(handle_navigation(state, user_id, callback, &pending, input).await);
    }

    // Stale cards must not commit new state: the callback name has to
    // match the live pending action exactly.
    let is_confirm = callback == pending.action.confirm_callback();
    let is_cancel = callback == pending.action.cancel_callback();
    let is_retry = pending.action.is_batch() && callback == pending.action.retry_callback();
    if !is_confirm && !is_cancel && !is_retry {
        tracing::warn!(
            user_id = %user_id,
            callback = %callback,
            expected = %pending.action.confirm_callback(),
            "callback action mismatch"
        );
        return Ok(expired_response());
    }

    if pending.action.is_batch() {
        return Ok(handle_batch(state, user_id, pending, is_cancel, is_retry, progress).await);
    }

    if is_cancel {
        state.states.cancel_pending_action(user_id)?;
        state.states.clear_pending_delete(user_id);
        let result = cancelled_result(&pending);
        return Ok(state.renderer.render(&result));
    }

    // Confirm: execute with the recorded idempotency key, then close out
    // the slot.
    let idempotency_key = idempotency_key_of(user_id, &pending);
    let outcome = state.executor.execute(&pending.payload, &idempotency_key).await;
    match outcome {
        Ok(outcome) => {
            state.states.confirm_pending_action(user_id)?;
            state.states.clear_pending_delete(user_id);
            let result = committed_result(&pending, &outcome);
            sync_state(state, user_id, "", &result);
            if let Some(next) = outcome.next_pending_action {
                state.states.set_pending_action(user_id, next);
            }
            Ok(state.renderer.render(&result))
        }
        Err(e) => {
            // The pending action stays parked so the user may retry
            // within the TTL.
            let result = SkillResult::failure(
                skill_name_of(pending.action),
                e.to_string(),
                user_message(e.error_code()),
                e.error_code(),
            );
            Ok(state.renderer.render(&result))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Confirm / cancel / retry for batch actions. Operations run strictly
/// sequentially; the updated operation list persists after every entry;
/// on the first failure every remaining `pending` entry is skipped.
pub async fn handle_batch(
    state: &AppState,
    user_id: &str,
    mut pending: PendingAction,
    is_cancel: bool,
    is_retry: bool,
    progress: Option<&dyn ProgressEmitter>,
) -> RenderedResponse {
    if is_cancel {
        if state.states.cancel_pending_action(user_id).is_err() {
            return expired_response();
        }
        return RenderedResponse::text(user_message("batch_cancelled"));
    }

    if is_retry {
        // Only failed and skipped entries rerun; succeeded never does.
        pending.reset_retryable_operations();
        if state
            .states
            .replace_pending_action(user_id, pending.clone())
            .is_err()
        {
            return expired_response();
        }
    }

    let pending_indices: Vec<usize> = pending
        .operations
        .iter()
        .filter(|e| e.status == OperationStatus::Pending)
        .map(|e| e.index)
        .collect();
    if pending_indices.is_empty() && pending.operations.is_empty() {
        return expired_response();
    }

    let emit_progress = progress.is_some() && pending_indices.len() >= 3;
    if emit_progress {
        if let Some(emitter) = progress {
            emitter.emit(
                user_id,
                BatchProgress::Start {
                    total: pending_indices.len(),
                },
            );
        }
    }

    let mut failed_seen = false;
    for index in pending_indices {
        let entry_payload = pending.operations[index].payload.clone();
        if failed_seen {
            let entry = &mut pending.operations[index];
            entry.status = OperationStatus::Skipped;
        } else {
            let key = format!("{}#{index}", idempotency_key_of(user_id, &pending));
            match state.executor.execute(&entry_payload, &key).await {
                Ok(_) => {
                    let entry = &mut pending.operations[index];
                    entry.status = OperationStatus::Succeeded;
                    entry.executed_at = Some(chrono::Utc::now());
                }
                Err(e) => {
                    let entry = &mut pending.operations[index];
                    entry.status = OperationStatus::Failed;
                    entry.error_code = Some(e.error_code().to_owned());
                    entry.error_detail = Some(e.to_string());
                    failed_seen = true;
                }
            }
        }
        // Persist after every entry so progress survives interruption.
        if state
            .states
            .update_pending_action_operations(user_id, pending.operations.clone())
            .is_err()
        {
            return expired_response();
        }
    }

    let total = pending.operations.len();
    let succeeded = pending.count_by_status(OperationStatus::Succeeded);
    let failed = pending.count_by_status(OperationStatus::Failed);
    let skipped = pending.count_by_status(OperationStatus::Skipped);
    let remaining = failed + skipped;

    if emit_progress {
        if let Some(emitter) = progress {
            emitter.emit(user_id, BatchProgress::Complete { succeeded, failed });
        }
    }

    let code = if remaining == 0 {
        "batch_all_succeeded"
    } else if succeeded > 0 {
        "batch_partial_success"
    } else {
        "batch_all_failed"
    };
    let mut text = batch_message(code, total, succeeded, failed);
    if remaining > 0 {
        text = format!("{text}\n{}", batch_retry_hint(remaining));
    }

    // All done → the slot closes as executed; otherwise it stays parked
    // for a retry within the TTL.
    if remaining == 0 {
        let _ = state.states.confirm_pending_action(user_id);
    }

    let mut data = SkillData::default();
    data.batch = Some(BatchOutcome {
        total,
        succeeded,
        failed,
        skipped,
        retry_available: remaining > 0,
        code: code.to_owned(),
    });
    if remaining > 0 {
        data.pending_action = Some(pending.clone());
    } else {
        data.clear_pending_action = true;
    }
    let mut result = SkillResult::ok(skill_name_of(pending.action), text);
    result.data = data;
    let mut rendered = state.renderer.render(&result);
    // The confirm card is done; surface only the retry affordance.
    if remaining > 0 {
        if let Some(card) = &mut rendered.card_template {
            card.params.insert(
                "retry_action".into(),
                serde_json::json!(pending.action.retry_callback()),
            );
        }
    }
    rendered
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Edit & navigation callbacks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Edit callbacks resolve the target record (active record → last result
/// → the value's record id) and open the update guide.
async fn handle_edit(state: &AppState, user_id: &str, input: &CallbackInput) -> RenderedResponse {
    let snapshot = state.states.state_of(user_id);
    let record = snapshot
        .active_record
        .as_ref()
        .map(|s| s.value.clone())
        .or_else(|| {
            let last = snapshot.last_result.as_ref()?;
            let record_id = input.value.get("record_id")?.as_str()?;
            let record = last
                .value
                .records
                .iter()
                .find(|r| r.record_id == record_id)?
                .clone();
            Some(ActiveRecord {
                record_id: record.record_id.clone(),
                table_id: record.table_id.clone().unwrap_or_default(),
                table_name: record.table_name.clone().unwrap_or_default(),
                record,
                source: "query".into(),
            })
        });

    let record = match record {
        Some(record) => record,
        None => {
            // Last resort: a point fetch by the card's record id.
            let Some(record_id) = input.value.get("record_id").and_then(Value::as_str) else {
                return expired_response();
            };
            let Some(table_id) = input.value.get("table_id").and_then(Value::as_str) else {
                return expired_response();
            };
            match state.client.record_get(table_id, record_id).await {
                Ok(record) => ActiveRecord {
                    record_id: record.record_id.clone(),
                    table_id: table_id.to_owned(),
                    table_name: input
                        .value
                        .get("table_name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    record,
                    source: "query".into(),
                },
                Err(e) => {
                    tracing::info!(error = %e, "edit callback target not found");
                    return expired_response();
                }
            }
        }
    };

    state.states.set_active_record(user_id, record.clone());

    let Some(skill) = state.registry.get("UpdateSkill") else {
        return expired_response();
    };
    let mut ctx = SkillContext::new("", user_id.to_owned());
    ctx.extra.update_guide = true;
    ctx.extra.active_record = Some(record);
    let result = skill.execute(&ctx).await;
    state.renderer.render(&result)
}

/// In-card pagination / quick-filter buttons re-run the parked query.
async fn handle_navigation(
    state: &AppState,
    user_id: &str,
    callback: &str,
    pending: &PendingAction,
    input: &CallbackInput,
) -> RenderedResponse {
    let ActionPayload::Navigation { callbacks } = &pending.payload else {
        return expired_response();
    };
    let Some(target) = callbacks.get(callback) else {
        tracing::warn!(user_id = %user_id, callback = %callback, "query callback action mismatch");
        return expired_response();
    };

    match target.kind.as_str() {
        "notice" => RenderedResponse::text(if target.text.is_empty() {
            "已经是最后一页了。".to_owned()
        } else {
            target.text.clone()
        }),
        _ => {
            let query = if target.query.is_empty() {
                "下一页".to_owned()
            } else {
                target.query.clone()
            };
            let Some(skill) = state.registry.get("QuerySkill") else {
                return expired_response();
            };
            let snapshot = state.states.state_of(user_id);
            let mut ctx = SkillContext::new(query.clone(), user_id.to_owned());
            ctx.extra.active_table = snapshot.active_table.map(|s| s.value);
            ctx.extra.pagination = snapshot.pagination.map(|s| s.value);
            ctx.extra.user_profile = cf_domain::types::UserProfile {
                open_id: input.open_id.clone(),
                user_name: input.user_name.clone(),
            };
            let result = skill.execute(&ctx).await;
            sync_state(state, user_id, &query, &result);
            state.renderer.render(&result)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result shaping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn skill_name_of(action: ActionKind) -> &'static str {
    match action.operation_kind() {
        ActionKind::CreateRecord => "CreateSkill",
        ActionKind::DeleteRecord => "DeleteSkill",
        _ => "UpdateSkill",
    }
}

/// Deterministic business key for the backend write: the same pending
/// action always commits under the same key, so a redelivered confirm
/// cannot double-write.
fn idempotency_key_of(user_id: &str, pending: &PendingAction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0]);
    hasher.update(pending.action.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(pending.created_at.timestamp_millis().to_le_bytes());
    hex::encode(&hasher.finalize()[..16])
}

fn cancelled_result(pending: &PendingAction) -> SkillResult {
    let mut data = SkillData::default();
    data.clear_pending_action = true;
    let text = match pending.action {
        ActionKind::DeleteRecord => "好的，已取消删除。",
        ActionKind::CloseRecord => "好的，已取消本次操作。",
        _ => "好的，已取消。",
    };
    let mut result = SkillResult::ok(skill_name_of(pending.action), text);
    result.data = data;
    result
}

fn committed_result(
    pending: &PendingAction,
    outcome: &cf_skills::action::ExecOutcome,
) -> SkillResult {
    let mut data = SkillData::default();
    data.clear_pending_action = true;
    data.record_id = Some(outcome.record_id.clone());
    if !outcome.record_url.is_empty() {
        data.record_url = Some(outcome.record_url.clone());
    }
    data.fields = outcome.fields.clone();
    data.changes = outcome.changes.clone();
    data.close_semantic = outcome.close_semantic.clone();
    data.progress_append = outcome.progress_append.clone();

    // The committed record becomes the conversation focus.
    if pending.action != ActionKind::DeleteRecord {
        if let Some(table) = &outcome.table {
            data.active_table = Some(table.clone());
            data.active_record = Some(ActiveRecord {
                record_id: outcome.record_id.clone(),
                record: cf_domain::record::Record {
                    record_id: outcome.record_id.clone(),
                    record_url: outcome.record_url.clone(),
                    ..Default::default()
                },
                table_id: table.table_id.clone(),
                table_name: table.table_name.clone(),
                source: "mutation".into(),
            });
        }
    }

    let text = match pending.action {
        ActionKind::CreateRecord => {
            let mut lines = vec!["OK 创建成功！".to_owned()];
            for (name, value) in &outcome.fields {
                lines.push(format!("• {name}：{value}"));
            }
            if !outcome.record_url.is_empty() {
                lines.push(format!("查看详情：{}", outcome.record_url));
            }
            lines.join("\n")
        }
        ActionKind::CloseRecord => {
            format!(
                "OK {}成功！",
                outcome.close_title.as_deref().unwrap_or("操作")
            )
        }
        ActionKind::DeleteRecord => "已删除该记录。".to_owned(),
        ActionKind::CreateReminder => "已为你登记提醒。".to_owned(),
        _ => {
            let mut lines = vec!["OK 更新成功！".to_owned()];
            for change in &outcome.changes {
                match &change.delta {
                    Some(delta) => lines.push(format!("• {}：追加 {delta}", change.field)),
                    None => lines.push(format!(
                        "• {}：{} → {}",
                        change.field, change.old, change.new
                    )),
                }
            }
            lines.join("\n")
        }
    };

    let mut result = SkillResult::ok(skill_name_of(pending.action), text);
    result.data = data;
    result
}
