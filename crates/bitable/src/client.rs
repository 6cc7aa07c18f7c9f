//! The backend client seam.
//!
//! Every operation returns `cf_domain::Result`; the HTTP implementation
//! maps backend rejections onto the distinct error variants the query
//! skill's fallback policy keys on (`FilterNotSupported`, `FieldNotFound`,
//! `RecordNotFound`, `PermissionDenied`, `RateLimited`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cf_domain::record::Record;
use cf_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metadata types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_id: String,
    pub name: String,
}

/// Backend field types, collapsed to what the formatter and the write
/// coercion care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    SingleSelect,
    MultiSelect,
    Person,
    Date,
    Checkbox,
    Url,
    Formula,
    Unknown,
}

impl FieldType {
    /// Text-like fields support `contains`; others only equality.
    pub fn is_text_like(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Url | FieldType::Formula)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::SingleSelect => "single_select",
            FieldType::MultiSelect => "multi_select",
            FieldType::Person => "person",
            FieldType::Date => "date",
            FieldType::Checkbox => "checkbox",
            FieldType::Url => "url",
            FieldType::Formula => "formula",
            FieldType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub field_type: FieldType,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Is,
    Contains,
    IsGreater,
    IsLess,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCondition {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl SearchCondition {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    pub records: Vec<Record>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(default)]
    pub total: u64,
    /// Field schema piggybacked on the search payload, when present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<FieldMeta>,
}

/// Paginated full-scan parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,
    #[serde(default)]
    pub ignore_default_view: bool,
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteResult {
    pub record_id: String,
    #[serde(default)]
    pub record_url: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed operations on the external record store.
#[async_trait::async_trait]
pub trait BitableClient: Send + Sync {
    /// Drop any cached table/field metadata. Default: nothing cached.
    fn invalidate_metadata(&self) {}

    async fn list_tables(&self) -> Result<Vec<TableInfo>>;

    async fn list_fields(&self, table_id: &str) -> Result<Vec<FieldMeta>>;

    /// Paginated full scan.
    async fn search(&self, table_id: &str, params: &ScanParams) -> Result<SearchPage>;

    /// Equality on a typed field; `contains` for text-like fields.
    async fn search_exact(&self, table_id: &str, field: &str, value: &str) -> Result<SearchPage>;

    /// Disjunction of `contains` over a field list.
    async fn search_keyword(
        &self,
        table_id: &str,
        keyword: &str,
        fields: &[String],
    ) -> Result<SearchPage>;

    /// Match on a person-typed field by open id or display name.
    async fn search_person(
        &self,
        table_id: &str,
        field: &str,
        open_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<SearchPage>;

    /// Half-open date window with optional minute-of-day bounds.
    async fn search_date_range(
        &self,
        table_id: &str,
        field: &str,
        from: Option<&str>,
        to: Option<&str>,
        time_from: Option<&str>,
        time_to: Option<&str>,
    ) -> Result<SearchPage>;

    /// Explicit AND/OR over condition triples.
    async fn search_advanced(
        &self,
        table_id: &str,
        conditions: &[SearchCondition],
        conjunction: Conjunction,
    ) -> Result<SearchPage>;

    async fn record_get(&self, table_id: &str, record_id: &str) -> Result<Record>;

    async fn record_create(
        &self,
        table_id: &str,
        fields: &BTreeMap<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<WriteResult>;

    async fn record_update(
        &self,
        table_id: &str,
        record_id: &str,
        fields: &BTreeMap<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<WriteResult>;

    async fn record_delete(
        &self,
        table_id: &str,
        record_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<()>;
}
