//! The per-message orchestrator pipeline.
//!
//! One inbound user message in, exactly one [`RenderedResponse`] out.
//! Steps: request id → sweep → cost check → transcript append → L0 rules
//! → planner/keyword intent → context resolution → skill dispatch →
//! state sync → render → personalize → usage log.

use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use cf_domain::messages::user_message;
use cf_domain::metric::MetricEvent;
use cf_domain::types::{
    LastResult, RenderedResponse, SkillContext, SkillResult, UserProfile,
};
use cf_domain::AGENT_TZ;
use cf_skills::intent::L0Decision;
use cf_skills::timeparse::parse_time_range;

use crate::state::AppState;

/// Normalized inbound message from the channel adapter.
#[derive(Debug, Clone, Default)]
pub struct MessageInput {
    /// Channel-scoped sender id (`open_id`).
    pub open_id: String,
    pub user_name: String,
    pub text: String,
    /// Idempotency key from the channel, when it provides one.
    pub event_id: Option<String>,
    /// Chat container id; required for group chats.
    pub chat_id: Option<String>,
    pub is_group_chat: bool,
}

impl MessageInput {
    /// Per-user state key. Group members are isolated inside the group.
    pub fn user_key(&self) -> String {
        match (&self.chat_id, self.is_group_chat) {
            (Some(chat_id), true) => {
                format!("channel:group:{chat_id}:user:{}", self.open_id)
            }
            _ => self.open_id.clone(),
        }
    }
}

/// Run one message through the pipeline. Acquiring the per-user lock is
/// the first step; it releases when this function returns.
pub async fn handle_message(state: &AppState, input: MessageInput) -> RenderedResponse {
    let request_id = Uuid::new_v4().to_string();
    let user_id = input.user_key();
    let span = tracing::info_span!("message", %request_id, user_id = %user_id);
    tracing::Instrument::instrument(handle_message_inner(state, input, request_id, user_id), span)
        .await
}

async fn handle_message_inner(
    state: &AppState,
    input: MessageInput,
    request_id: String,
    user_id: String,
) -> RenderedResponse {
    let started = Instant::now();

    // Redelivered events short-circuit before any work.
    if let Some(event_id) = &input.event_id {
        if state.event_dedupe.check_and_mark(event_id) {
            tracing::info!(event_id = %event_id, "duplicate event dropped");
            return RenderedResponse::text(user_message("callback_processed"));
        }
    }

    let _lock = state.user_locks.acquire(&user_id).await;

    // Sweep expired state and publish the session gauge.
    let active = state.states.sweep();
    state.event_dedupe.sweep();
    state.user_locks.prune_idle();
    MetricEvent::ActiveSessions { count: active }.emit();

    // Cost monitor: when LLM calls are blocked, rule-driven commands
    // still work; anything needing the planner gets the guidance reply.
    let (llm_allowed, guidance) = state.cost_guard.check_call_allowed("llm");

    state.transcripts.append(&user_id, "user", &input.text);

    // Reply-preference commands update the slot and settle the turn.
    if let Some((prefs, reply)) = parse_preference_command(&input.text) {
        state.states.set_reply_preferences(&user_id, prefs);
        state.transcripts.append(&user_id, "assistant", &reply);
        return RenderedResponse::text(reply);
    }

    // L0 rules can settle the turn without any model call.
    let resolver = state.current_resolver();
    let (skill_name, skill_match) = match resolver.l0_decision(&input.text) {
        L0Decision::Reply(text) => {
            state.transcripts.append(&user_id, "assistant", &text);
            MetricEvent::RequestsTotal {
                skill: "l0".into(),
                status: "ok",
            }
            .emit();
            return RenderedResponse::text(text);
        }
        L0Decision::ForceSkill(name) => (name, None),
        L0Decision::ChitchatHint => ("ChitchatSkill".to_owned(), None),
        L0Decision::None => {
            if !llm_allowed {
                // No rule matched and the planner is blocked: answer with
                // the guard's guidance instead of guessing.
                state.transcripts.append(&user_id, "assistant", &guidance);
                MetricEvent::RequestsTotal {
                    skill: "cost_guard".into(),
                    status: "blocked",
                }
                .emit();
                return RenderedResponse::text(guidance);
            }
            let context = format!(
                "{}\n{}",
                state.memory.render_snapshot(&user_id),
                state.transcripts.render_context(&user_id, 6),
            );
            let matched = resolver.resolve(&input.text, context.trim(), llm_allowed).await;
            (matched.skill.clone(), Some(matched))
        }
    };

    // Resolve effective context from the state snapshot.
    let ctx = build_context(state, &user_id, &input, skill_match.as_ref(), llm_allowed);

    // Dispatch, bounded by the per-skill timeout.
    let timeout = Duration::from_millis(state.config.skills.skill_timeout_ms);
    let result = match state.registry.get(&skill_name) {
        Some(skill) => match tokio::time::timeout(timeout, skill.execute(&ctx)).await {
            Ok(result) => result,
            Err(_) => SkillResult::failure(
                &skill_name,
                "skill timeout",
                user_message("timeout"),
                "timeout",
            ),
        },
        None => SkillResult::failure(
            &skill_name,
            format!("unknown skill {skill_name}"),
            user_message("general"),
            "general",
        ),
    };

    // Sync state from the result payload.
    sync_state(state, &user_id, &input.text, &result);

    // Render + personalize.
    let mut response = state.renderer.render(&result);
    if state.config.cards.personalization.enabled {
        if let Some(prefs) = state.states.state_of(&user_id).reply_preferences {
            cf_cards::personalize(&mut response, &prefs.value);
        }
    }

    // Transcript, memory, usage accounting.
    state
        .transcripts
        .append(&user_id, "assistant", &response.text_fallback);
    state.memory.record(
        &user_id,
        "turn",
        &format!("{} -> {}", input.text, result.skill_name),
    );
    MetricEvent::RequestsTotal {
        skill: result.skill_name.clone(),
        status: if result.success { "ok" } else { "error" },
    }
    .emit();
    let usage = crate::runtime::usage_log::UsageRecord {
        request_id,
        user_id: user_id.clone(),
        skill: result.skill_name.clone(),
        route_label: ctx.extra.route_label.clone(),
        prompt_tokens: 0,
        completion_tokens: 0,
        cost_usd: 0.0,
        duration_ms: started.elapsed().as_millis() as u64,
        success: result.success,
    };
    let guard = state.cost_guard.clone();
    let skill = result.skill_name.clone();
    state
        .usage_log
        .write(&usage, move || guard.record_cost(&skill, 0.0));

    response
}

/// Detect "reply style" commands and map them onto the preference slot.
fn parse_preference_command(text: &str) -> Option<(cf_domain::types::ReplyPreferences, String)> {
    let text = text.trim();
    if !(text.contains("回复") || text.contains("说话") || text.contains("语气")) {
        return None;
    }
    let mut prefs = cf_domain::types::ReplyPreferences::default();
    if text.contains("简短") || text.contains("短一点") || text.contains("短一些") {
        prefs.length = "short".into();
    } else if text.contains("详细") {
        prefs.length = "detailed".into();
    }
    if text.contains("友好") || text.contains("轻松") {
        prefs.tone = "friendly".into();
    } else if text.contains("正式") {
        prefs.tone = "formal".into();
    }
    if prefs == cf_domain::types::ReplyPreferences::default() {
        return None;
    }
    Some((prefs, "好的，已按你的偏好调整回复方式。".to_owned()))
}

/// Snapshot the conversation state into the skill context.
fn build_context(
    state: &AppState,
    user_id: &str,
    input: &MessageInput,
    skill_match: Option<&cf_skills::intent::SkillMatch>,
    llm_allowed: bool,
) -> SkillContext {
    let snapshot = state.states.state_of(user_id);
    let mut ctx = SkillContext::new(input.text.clone(), user_id.to_owned());

    ctx.last_skill = snapshot.last_skill.as_ref().map(|s| s.value.clone());
    ctx.extra.active_table = snapshot.active_table.map(|s| s.value);
    ctx.extra.active_record = snapshot.active_record.map(|s| s.value);
    ctx.extra.pending_action = snapshot.pending_action;
    ctx.extra.last_result = snapshot.last_result.map(|s| s.value);
    ctx.extra.pagination = snapshot.pagination.map(|s| s.value);
    ctx.extra.user_profile = UserProfile {
        open_id: input.open_id.clone(),
        user_name: input.user_name.clone(),
    };
    ctx.extra.chat_id = input.chat_id.clone();
    ctx.extra.is_group_chat = input.is_group_chat;
    ctx.extra.route_label = "primary".to_owned();
    ctx.extra.llm_allowed = llm_allowed;

    let today = Utc::now().with_timezone(&AGENT_TZ).date_naive();
    ctx.extra.date_range = parse_time_range(&input.text, today);
    if let Some(matched) = skill_match {
        ctx.extra.plan = matched.plan.clone();
    }
    ctx
}

/// Persist the slot changes a skill described in its result data.
pub(crate) fn sync_state(state: &AppState, user_id: &str, query: &str, result: &SkillResult) {
    let data = &result.data;

    if let Some(action) = &data.pending_action {
        state.states.set_pending_action(user_id, action.clone());
    }
    if let Some(pending_delete) = &data.pending_delete {
        state.states.set_pending_delete(user_id, pending_delete.clone());
    }
    if let Some(need_confirm) = &data.need_confirm {
        // Candidates park in last_result until the user picks one.
        state.states.set_last_result(
            user_id,
            LastResult {
                records: Vec::new(),
                query: need_confirm.original_query.clone(),
                candidates: need_confirm.candidates.clone(),
            },
        );
    } else if let Some(records) = &data.records {
        if result.success {
            let effective_query = data
                .query_text
                .clone()
                .filter(|q| !q.is_empty())
                .unwrap_or_else(|| query.to_owned());
            state.states.set_last_result(
                user_id,
                LastResult {
                    records: records.clone(),
                    query: effective_query,
                    candidates: Vec::new(),
                },
            );
        }
    }
    if let Some(table) = &data.active_table {
        state.states.set_active_table(user_id, table.clone());
    }
    if let Some(record) = &data.active_record {
        state.states.set_active_record(user_id, record.clone());
    }
    match &data.pagination_cursor {
        Some(cursor) => state.states.set_pagination(user_id, cursor.clone()),
        None => {
            if data.records.is_some() {
                // A fresh result page without a cursor ends pagination.
                state.states.clear_pagination(user_id);
            }
        }
    }
    if result.success {
        state.states.set_last_skill(user_id, &result.skill_name);
    }
}
