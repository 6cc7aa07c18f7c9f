//! Per-table field-type cache and write-path value coercion.
//!
//! The cache is keyed by table id (one app token per process). It is
//! refreshed on explicit invalidation, when a search returns a schema
//! payload, and lazily before write operations so user-supplied values can
//! be coerced to backend-native shapes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use serde_json::Value;

use cf_cache::{Clock, TtlCache};
use cf_domain::{Result, AGENT_TZ};

use crate::client::{BitableClient, FieldMeta, FieldType};

/// Field name → type map for one table.
pub type TableSchema = Arc<HashMap<String, FieldType>>;

pub struct SchemaCache {
    entries: TtlCache<String, TableSchema>,
}

impl SchemaCache {
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: TtlCache::new(64, Duration::from_secs(ttl_secs), clock),
        }
    }

    pub fn get(&self, table_id: &str) -> Option<TableSchema> {
        self.entries.get(&table_id.to_owned())
    }

    pub fn invalidate(&self, table_id: &str) {
        self.entries.delete(&table_id.to_owned());
    }

    /// Feed a schema payload piggybacked on a search response.
    pub fn sync_from_search(&self, table_id: &str, fields: &[FieldMeta]) {
        if fields.is_empty() {
            return;
        }
        self.store(table_id, fields);
    }

    fn store(&self, table_id: &str, fields: &[FieldMeta]) -> TableSchema {
        let schema: TableSchema = Arc::new(
            fields
                .iter()
                .map(|f| (f.name.clone(), f.field_type))
                .collect(),
        );
        self.entries.set(table_id.to_owned(), schema.clone());
        schema
    }

    /// Cached schema, fetching through the client on a miss. Called lazily
    /// before every write.
    pub async fn get_or_fetch(
        &self,
        client: &dyn BitableClient,
        table_id: &str,
    ) -> Result<TableSchema> {
        if let Some(schema) = self.get(table_id) {
            return Ok(schema);
        }
        let fields = client.list_fields(table_id).await?;
        Ok(self.store(table_id, &fields))
    }

    /// Coerce user-supplied write values to backend-native shapes:
    /// date strings become millisecond timestamps, multi-select scalars
    /// become single-element option arrays, numeric strings become
    /// numbers. Unknown fields pass through untouched.
    pub fn coerce_fields(
        &self,
        schema: &HashMap<String, FieldType>,
        fields: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        fields
            .iter()
            .map(|(name, value)| {
                let coerced = match schema.get(name) {
                    Some(FieldType::Date) => coerce_date(value),
                    Some(FieldType::Number) => coerce_number(value),
                    Some(FieldType::MultiSelect) => coerce_multi_select(value),
                    _ => value.clone(),
                };
                (name.clone(), coerced)
            })
            .collect()
    }
}

fn coerce_date(value: &Value) -> Value {
    let Some(text) = value.as_str() else {
        return value.clone();
    };
    let text = text.trim();
    // Accept `YYYY-MM-DD`, `YYYY-MM-DD HH:MM` and `YYYY/MM/DD`.
    let parsed = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(text, "%Y/%m/%d"))
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });
    match parsed {
        Some(naive) => match AGENT_TZ.from_local_datetime(&naive).single() {
            Some(local) => Value::from(local.timestamp_millis()),
            None => value.clone(),
        },
        None => value.clone(),
    }
}

fn coerce_number(value: &Value) -> Value {
    match value.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
        Some(n) => serde_json::json!(n),
        None => value.clone(),
    }
}

fn coerce_multi_select(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::json!([s]),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_cache::ManualClock;

    fn schema_of(pairs: &[(&str, FieldType)]) -> HashMap<String, FieldType> {
        pairs
            .iter()
            .map(|(n, t)| (n.to_string(), *t))
            .collect()
    }

    fn cache() -> SchemaCache {
        SchemaCache::new(600, Arc::new(ManualClock::new()))
    }

    #[test]
    fn date_strings_become_millis() {
        let cache = cache();
        let schema = schema_of(&[("开庭日期", FieldType::Date)]);
        let fields = BTreeMap::from([("开庭日期".to_string(), serde_json::json!("2024-09-10"))]);
        let out = cache.coerce_fields(&schema, &fields);
        let ms = out["开庭日期"].as_i64().unwrap();
        // 2024-09-10 00:00 +08:00
        assert_eq!(ms, 1_725_897_600_000);
    }

    #[test]
    fn datetime_strings_keep_minutes() {
        let cache = cache();
        let schema = schema_of(&[("开庭日期", FieldType::Date)]);
        let fields =
            BTreeMap::from([("开庭日期".to_string(), serde_json::json!("2024-09-10 09:30"))]);
        let out = cache.coerce_fields(&schema, &fields);
        assert_eq!(out["开庭日期"].as_i64().unwrap(), 1_725_931_800_000);
    }

    #[test]
    fn numeric_strings_become_numbers() {
        let cache = cache();
        let schema = schema_of(&[("标的额", FieldType::Number)]);
        let fields = BTreeMap::from([("标的额".to_string(), serde_json::json!("120000.5"))]);
        let out = cache.coerce_fields(&schema, &fields);
        assert_eq!(out["标的额"].as_f64().unwrap(), 120000.5);
    }

    #[test]
    fn multi_select_scalars_are_wrapped() {
        let cache = cache();
        let schema = schema_of(&[("标签", FieldType::MultiSelect)]);
        let fields = BTreeMap::from([("标签".to_string(), serde_json::json!("加急"))]);
        let out = cache.coerce_fields(&schema, &fields);
        assert_eq!(out["标签"], serde_json::json!(["加急"]));
    }

    #[test]
    fn unknown_fields_pass_through() {
        let cache = cache();
        let schema = schema_of(&[]);
        let fields = BTreeMap::from([("备注".to_string(), serde_json::json!("保持原样"))]);
        let out = cache.coerce_fields(&schema, &fields);
        assert_eq!(out["备注"], serde_json::json!("保持原样"));
    }

    #[test]
    fn search_schema_sync_populates_cache() {
        let cache = cache();
        cache.sync_from_search(
            "tbl1",
            &[FieldMeta {
                name: "案号".into(),
                field_type: FieldType::Text,
            }],
        );
        let schema = cache.get("tbl1").unwrap();
        assert_eq!(schema.get("案号"), Some(&FieldType::Text));
    }
}
