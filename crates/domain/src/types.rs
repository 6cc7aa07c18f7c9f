//! Request/response value types flowing between the orchestrator, the
//! skills, and the renderer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pending::{FieldChange, PendingAction, ReminderSpec};
use crate::record::{Record, TableRef};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SkillContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// User profile snapshot resolved from the channel adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub open_id: String,
    #[serde(default)]
    pub user_name: String,
}

/// Half-open date window resolved by the time parser or the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// `YYYY-MM-DD`, inclusive.
    pub from: String,
    /// `YYYY-MM-DD`, exclusive.
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to: Option<String>,
}

/// Pagination cursor persisted between turns so "下一页" continues the
/// previous query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationCursor {
    /// The backend tool that produced the page (e.g. `search_keyword`).
    pub tool: String,
    /// Tool parameters, re-used verbatim on continuation.
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub total: u64,
}

/// Active-record snapshot: the conversation's current focus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub record_id: String,
    pub record: Record,
    pub table_id: String,
    pub table_name: String,
    /// Where the focus came from: `query` or `mutation`.
    pub source: String,
}

/// Planner output snapshot attached to the context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerPlan {
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Resolved per-request context handed to skills. Skills read these
/// snapshots; only the state manager writes the underlying slots.
#[derive(Debug, Clone)]
pub struct ContextExtra {
    pub active_table: Option<TableRef>,
    pub active_record: Option<ActiveRecord>,
    pub pending_action: Option<PendingAction>,
    pub last_result: Option<LastResult>,
    pub user_profile: UserProfile,
    pub date_range: Option<DateRange>,
    pub plan: Option<PlannerPlan>,
    pub pagination: Option<PaginationCursor>,
    /// Route decision label (`primary` or an A/B bucket name).
    pub route_label: String,
    /// Chat metadata (group vs direct, chat id).
    pub chat_id: Option<String>,
    pub is_group_chat: bool,
    /// Set by the edit callback: the update skill renders its guide card
    /// instead of proposing a change.
    pub update_guide: bool,
    /// Cleared by the cost guard when LLM calls are blocked for this
    /// request; skills then stay on their rule paths.
    pub llm_allowed: bool,
}

impl Default for ContextExtra {
    fn default() -> Self {
        Self {
            active_table: None,
            active_record: None,
            pending_action: None,
            last_result: None,
            user_profile: UserProfile::default(),
            date_range: None,
            plan: None,
            pagination: None,
            route_label: String::new(),
            chat_id: None,
            is_group_chat: false,
            update_guide: false,
            llm_allowed: true,
        }
    }
}

/// The previous query result kept for follow-up turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastResult {
    pub records: Vec<Record>,
    pub query: String,
    /// Table-disambiguation candidates parked here while the user picks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

/// Per-request input to a skill.
#[derive(Debug, Clone, Default)]
pub struct SkillContext {
    /// Raw user text.
    pub query: String,
    /// Channel-scoped user key. Group members get
    /// `channel:group:{chat_id}:user:{open_id}` so state stays per-user.
    pub user_id: String,
    pub last_skill: Option<String>,
    pub extra: ContextExtra,
}

impl SkillContext {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SkillResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyType {
    #[default]
    Text,
    Card,
}

/// Result-page metadata for a query response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub current_page: u32,
}

/// Table-disambiguation state returned when confidence is too low.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeedConfirm {
    pub candidates: Vec<String>,
    pub original_query: String,
}

/// Outcome counters for a batch commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retry_available: bool,
    /// `batch_all_succeeded` | `batch_partial_success` | `batch_all_failed`.
    pub code: String,
}

/// Structured payload of a skill result. A typed bag of optional
/// sub-records rather than a dynamic map; each skill populates the
/// sections it owns and the renderer reads them without downcasts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PageInfo>,
    /// Continuation cursor the orchestrator persists into the pagination
    /// slot; absent when the result has no further pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination_cursor: Option<PaginationCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
    /// True when the handled turn closed out the pending slot.
    #[serde(default)]
    pub clear_pending_action: bool,
    /// Legacy single-record delete confirmation slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_delete: Option<PendingDelete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_table: Option<TableRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_record: Option<ActiveRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_semantic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    /// Flat scalar fields for kv_list rendering (mutation successes).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need_confirm: Option<NeedConfirm>,
    /// Update-skill "please specify fields to change" sub-state.
    #[serde(default)]
    pub guide: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_reminders: Vec<ReminderSpec>,
    /// Appended progress fragment highlighted on update success cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_append: Option<String>,
    /// Set when the query fell back to a local scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchOutcome>,
    /// Original query text echoed for list headers and follow-ups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,
    /// True when the reply is chit-chat (personalization carve-out).
    #[serde(default)]
    pub chitchat: bool,
}

/// Legacy delete-confirmation payload rendered on `delete.confirm` cards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingDelete {
    pub record_id: String,
    pub summary: String,
    pub table_id: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub confirm_type: String,
}

/// Uniform skill response.
#[derive(Debug, Clone, Default)]
pub struct SkillResult {
    pub success: bool,
    pub skill_name: String,
    pub data: SkillData,
    /// Internal / log-oriented message.
    pub message: String,
    /// Human-oriented fallback text.
    pub reply_text: String,
    pub reply_type: ReplyType,
}

impl SkillResult {
    pub fn ok(skill_name: impl Into<String>, reply_text: impl Into<String>) -> Self {
        Self {
            success: true,
            skill_name: skill_name.into(),
            reply_text: reply_text.into(),
            reply_type: ReplyType::Card,
            ..Default::default()
        }
    }

    pub fn failure(
        skill_name: impl Into<String>,
        message: impl Into<String>,
        reply_text: impl Into<String>,
        error_code: impl Into<String>,
    ) -> Self {
        let mut data = SkillData::default();
        data.error_code = Some(error_code.into());
        Self {
            success: false,
            skill_name: skill_name.into(),
            data,
            message: message.into(),
            reply_text: reply_text.into(),
            reply_type: ReplyType::Text,
        }
    }

    pub fn with_data(mut self, data: SkillData) -> Self {
        self.data = data;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RenderedResponse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A content block of the rendered reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Paragraph { text: String },
    KvList { items: Vec<KvItem> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvItem {
    pub key: String,
    pub value: String,
}

/// Card-template reference rendered by the channel adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardTemplateSpec {
    pub template_id: String,
    #[serde(default = "d_template_version")]
    pub version: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

fn d_template_version() -> String {
    "v1".into()
}

/// Terminal output of the pipeline: the adapter renders either
/// `blocks` + `card_template` (preferred) or the plaintext fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderedResponse {
    pub text_fallback: String,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_template: Option<CardTemplateSpec>,
}

impl RenderedResponse {
    /// Minimal valid response: one paragraph carrying the fallback.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            blocks: vec![Block::Paragraph { text: text.clone() }],
            text_fallback: text,
            meta: BTreeMap::new(),
            card_template: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply preferences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreferences {
    /// `friendly` | `formal` | empty for default.
    #[serde(default)]
    pub tone: String,
    /// `short` | `detailed` | empty for default.
    #[serde(default)]
    pub length: String,
}

/// One user/assistant turn kept in the session transcript ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_response_always_has_a_paragraph() {
        let r = RenderedResponse::text("查询结果为空");
        assert_eq!(r.text_fallback, "查询结果为空");
        assert_eq!(
            r.blocks,
            vec![Block::Paragraph {
                text: "查询结果为空".into()
            }]
        );
    }

    #[test]
    fn failure_result_carries_error_code() {
        let r = SkillResult::failure("QuerySkill", "backend 404", "未找到目标记录", "record_not_found");
        assert!(!r.success);
        assert_eq!(r.data.error_code.as_deref(), Some("record_not_found"));
    }

    #[test]
    fn block_serialization_is_tagged() {
        let b = Block::KvList {
            items: vec![KvItem {
                key: "案号".into(),
                value: "(2024)粤0101民初100号".into(),
            }],
        };
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["type"], "kv_list");
    }
}
