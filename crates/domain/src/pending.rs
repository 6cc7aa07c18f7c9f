//! Pending actions — the heart of the propose → confirm | cancel | retry
//! confirmation protocol.
//!
//! A `PendingAction` is a proposed mutation parked in the conversation
//! state until the user confirms or cancels it via a card callback, or it
//! expires. Status enums serialize as stable snake_case strings so a
//! durable state store round-trips them verbatim.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::TableRef;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fixed set of proposable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateRecord,
    UpdateRecord,
    CloseRecord,
    DeleteRecord,
    CreateReminder,
    BatchUpdateRecords,
    BatchCloseRecords,
    BatchDeleteRecords,
    /// Pseudo-action carrying in-card pagination / quick-filter callbacks.
    /// Shares the pending slot so navigation buttons expire alongside the
    /// result they refer to.
    QueryListNavigation,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateRecord => "create_record",
            ActionKind::UpdateRecord => "update_record",
            ActionKind::CloseRecord => "close_record",
            ActionKind::DeleteRecord => "delete_record",
            ActionKind::CreateReminder => "create_reminder",
            ActionKind::BatchUpdateRecords => "batch_update_records",
            ActionKind::BatchCloseRecords => "batch_close_records",
            ActionKind::BatchDeleteRecords => "batch_delete_records",
            ActionKind::QueryListNavigation => "query_list_navigation",
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            ActionKind::BatchUpdateRecords
                | ActionKind::BatchCloseRecords
                | ActionKind::BatchDeleteRecords
        )
    }

    /// The per-operation action a batch kind decomposes into.
    pub fn operation_kind(&self) -> ActionKind {
        match self {
            ActionKind::BatchUpdateRecords => ActionKind::UpdateRecord,
            ActionKind::BatchCloseRecords => ActionKind::CloseRecord,
            ActionKind::BatchDeleteRecords => ActionKind::DeleteRecord,
            other => *other,
        }
    }

    /// Expected callback action names. Stale cards whose callback does not
    /// match these exactly must be rejected as expired.
    pub fn confirm_callback(&self) -> String {
        format!("{}_confirm", self.as_str())
    }
    pub fn cancel_callback(&self) -> String {
        format!("{}_cancel", self.as_str())
    }
    pub fn retry_callback(&self) -> String {
        format!("{}_retry", self.as_str())
    }

    pub fn parse(raw: &str) -> Option<ActionKind> {
        Some(match raw {
            "create_record" => ActionKind::CreateRecord,
            "update_record" => ActionKind::UpdateRecord,
            "close_record" => ActionKind::CloseRecord,
            "delete_record" => ActionKind::DeleteRecord,
            "create_reminder" => ActionKind::CreateReminder,
            "batch_update_records" => ActionKind::BatchUpdateRecords,
            "batch_close_records" => ActionKind::BatchCloseRecords,
            "batch_delete_records" => ActionKind::BatchDeleteRecords,
            "query_list_navigation" => ActionKind::QueryListNavigation,
            _ => return None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One field-level change in an update proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
    #[serde(default)]
    pub mode: ChangeMode,
    /// For append-mode fields, the appended fragment only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMode {
    #[default]
    Replace,
    Append,
}

/// An auto-reminder derived from a date field in a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderSpec {
    pub field: String,
    pub remind_at_ms: i64,
    pub text: String,
}

/// Resolved close-profile parameters carried into the proposal so the
/// commit path does not re-resolve configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosePlan {
    /// Profile semantic, e.g. `default` or `enforcement_end`.
    pub semantic: String,
    pub title: String,
    pub status_field: String,
    pub target_status: String,
    pub remove_from_open_list: bool,
    pub reminder_policy: String,
}

/// Summary shown on a delete confirmation card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteSummary {
    #[serde(default)]
    pub case_no: String,
    #[serde(default)]
    pub cause: String,
}

/// One in-card navigation target (pagination / quick filter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationTarget {
    /// `query` re-runs a query; `notice` replies with static text.
    pub kind: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

/// Action-specific proposal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    Create {
        table: TableRef,
        fields: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dedupe_warning: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reminders: Vec<ReminderSpec>,
    },
    Update {
        table: TableRef,
        record_id: String,
        fields: BTreeMap<String, Value>,
        diff: Vec<FieldChange>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reminders: Vec<ReminderSpec>,
    },
    Close {
        table: TableRef,
        record_id: String,
        plan: ClosePlan,
        #[serde(default)]
        summary: DeleteSummary,
    },
    Delete {
        table: TableRef,
        record_id: String,
        summary: DeleteSummary,
    },
    Reminder {
        table: TableRef,
        record_id: String,
        spec: ReminderSpec,
    },
    Navigation {
        callbacks: BTreeMap<String, NavigationTarget>,
    },
}

impl ActionPayload {
    pub fn table(&self) -> Option<&TableRef> {
        match self {
            ActionPayload::Create { table, .. }
            | ActionPayload::Update { table, .. }
            | ActionPayload::Close { table, .. }
            | ActionPayload::Delete { table, .. }
            | ActionPayload::Reminder { table, .. } => Some(table),
            ActionPayload::Navigation { .. } => None,
        }
    }

    pub fn record_id(&self) -> Option<&str> {
        match self {
            ActionPayload::Update { record_id, .. }
            | ActionPayload::Close { record_id, .. }
            | ActionPayload::Delete { record_id, .. }
            | ActionPayload::Reminder { record_id, .. } => Some(record_id),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending action + operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Proposed,
    Executed,
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

/// One operation inside a batch pending action. Indices are dense `0..n-1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEntry {
    pub index: usize,
    pub payload: ActionPayload,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl OperationEntry {
    pub fn new(index: usize, payload: ActionPayload) -> Self {
        Self {
            index,
            payload,
            status: OperationStatus::Pending,
            error_code: None,
            error_detail: None,
            executed_at: None,
        }
    }
}

/// A proposed mutation awaiting user confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub action: ActionKind,
    pub payload: ActionPayload,
    /// Empty for single-op actions; dense `0..n-1` for batch actions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<OperationEntry>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PendingStatus,
}

impl PendingAction {
    pub fn new(
        action: ActionKind,
        payload: ActionPayload,
        created_at: DateTime<Utc>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            action,
            payload,
            operations: Vec::new(),
            created_at,
            expires_at: created_at + chrono::Duration::seconds(ttl_secs.max(1)),
            status: PendingStatus::Proposed,
        }
    }

    pub fn with_operations(mut self, operations: Vec<OperationEntry>) -> Self {
        self.operations = operations;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Reset `failed` and `skipped` entries to `pending` for a retry.
    /// `succeeded` entries are never touched (exactly-once per entry).
    pub fn reset_retryable_operations(&mut self) {
        for entry in &mut self.operations {
            if matches!(
                entry.status,
                OperationStatus::Failed | OperationStatus::Skipped
            ) {
                entry.status = OperationStatus::Pending;
                entry.error_code = None;
                entry.error_detail = None;
            }
        }
    }

    pub fn count_by_status(&self, status: OperationStatus) -> usize {
        self.operations
            .iter()
            .filter(|e| e.status == status)
            .count()
    }
}
