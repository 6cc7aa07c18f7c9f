//! Shared proposal plumbing: target-table resolution, schema-aware field
//! extraction, write defaults, duplicate detection, diff building with
//! append-mode fields, and auto-reminder derivation.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use serde_json::Value;

use cf_bitable::FieldType;
use cf_domain::pending::{ChangeMode, FieldChange, ReminderSpec};
use cf_domain::record::{Record, TableRef, DATE_MS_THRESHOLD};
use cf_domain::types::SkillContext;
use cf_domain::{Error, Result, AGENT_TZ};

use crate::skill::SkillDeps;

pub struct ProposalBuilder {
    deps: SkillDeps,
}

impl ProposalBuilder {
    pub fn new(deps: SkillDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &SkillDeps {
        &self.deps
    }

    /// Resolve the table a mutation targets: the conversation's active
    /// table first, then a domain hint in the utterance.
    pub async fn resolve_target_table(&self, ctx: &SkillContext) -> Result<TableRef> {
        if let Some(active) = &ctx.extra.active_table {
            if !active.table_id.is_empty() {
                return Ok(active.clone());
            }
        }
        let tables = self.deps.client.list_tables().await?;
        for (table_type, aliases) in &self.deps.tables.type_aliases {
            if aliases.iter().any(|a| ctx.query.contains(a.as_str())) {
                if let Some(default_name) = self.deps.tables.default_tables.get(table_type) {
                    if let Some(info) = tables.iter().find(|t| &t.name == default_name) {
                        return Ok(TableRef::new(info.table_id.clone(), info.name.clone()));
                    }
                }
                if let Some(info) = tables
                    .iter()
                    .find(|t| aliases.iter().any(|a| t.name.contains(a.as_str())))
                {
                    return Ok(TableRef::new(info.table_id.clone(), info.name.clone()));
                }
            }
        }
        if tables.len() == 1 {
            return Ok(TableRef::new(
                tables[0].table_id.clone(),
                tables[0].name.clone(),
            ));
        }
        Err(Error::Other("无法确定目标数据表".into()))
    }

    /// Reject writes against read-only table types.
    pub fn write_denied_reason(&self, table_name: &str) -> Option<String> {
        let table_type = self.deps.tables.table_type_of(table_name)?;
        self.deps
            .tables
            .is_read_only(table_type)
            .then(|| format!("「{table_name}」为只读数据，暂不支持写入。"))
    }

    /// LLM-assisted, schema-aware field extraction from the utterance.
    pub async fn extract_fields(
        &self,
        query: &str,
        table_id: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let schema = self
            .deps
            .schema
            .get_or_fetch(self.deps.client.as_ref(), table_id)
            .await?;
        let mut field_names: Vec<String> = schema.keys().cloned().collect();
        field_names.sort();
        let reply = self.deps.llm.extract_slots(query, &field_names).await?;
        let fields = reply
            .value
            .into_iter()
            .filter(|(name, _)| schema.contains_key(name))
            .map(|(name, text)| (name, Value::String(text)))
            .collect();
        Ok(fields)
    }

    /// Populate registered per-table-type defaults for missing fields.
    pub fn apply_create_defaults(
        &self,
        table_name: &str,
        fields: &mut BTreeMap<String, Value>,
    ) {
        let Some(table_type) = self.deps.tables.table_type_of(table_name) else {
            return;
        };
        if let Some(defaults) = self.deps.tables.create_defaults.get(table_type) {
            for (name, value) in defaults {
                fields
                    .entry(name.clone())
                    .or_insert_with(|| Value::String(value.clone()));
            }
        }
    }

    /// Duplicate detection on the table's registered dedupe field.
    /// Returns a warning line on a hit; the proposal still goes out.
    pub async fn dedupe_warning(
        &self,
        table: &TableRef,
        fields: &BTreeMap<String, Value>,
    ) -> Option<String> {
        let table_type = self.deps.tables.table_type_of(&table.table_name)?;
        let dedupe_field = self.deps.tables.dedupe_fields.get(table_type)?;
        let value = fields.get(dedupe_field)?.as_str()?.trim();
        if value.is_empty() {
            return None;
        }
        match self
            .deps
            .client
            .search_exact(&table.table_id, dedupe_field, value)
            .await
        {
            Ok(page) if !page.records.is_empty() => Some(format!(
                "已存在 {dedupe_field} 为「{value}」的记录，确认后将再新增一条。"
            )),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "dedupe lookup failed");
                None
            }
        }
    }

    /// Derive auto-reminders from future date fields in the write set.
    pub async fn build_reminders(
        &self,
        table_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Vec<ReminderSpec> {
        let Ok(schema) = self
            .deps
            .schema
            .get_or_fetch(self.deps.client.as_ref(), table_id)
            .await
        else {
            return Vec::new();
        };
        let now_ms = Utc::now().timestamp_millis();
        fields
            .iter()
            .filter(|(name, _)| schema.get(*name) == Some(&FieldType::Date))
            .filter_map(|(name, value)| {
                let ms = date_value_to_ms(value)?;
                (ms > now_ms).then(|| ReminderSpec {
                    field: name.clone(),
                    remind_at_ms: ms,
                    text: format!("「{name}」即将到期，请及时跟进。"),
                })
            })
            .collect()
    }

    /// Locate the mutation target: the active record, else a point query
    /// by an identifier in the utterance.
    pub async fn locate_record(
        &self,
        ctx: &SkillContext,
        table: &TableRef,
    ) -> Result<Record> {
        if let Some(active) = &ctx.extra.active_record {
            if active.table_id == table.table_id && !active.record_id.is_empty() {
                return Ok(active.record.clone());
            }
        }
        // Fresh point query by identifier-shaped content.
        let extractor = crate::query::semantic::SemanticExtractor::new();
        let slots = extractor.extract(&ctx.query);
        let keyword = slots
            .case_identifier
            .or(slots.party)
            .ok_or_else(|| Error::RecordNotFound("无法定位目标记录".into()))?;
        let page = self
            .deps
            .client
            .search_keyword(
                &table.table_id,
                &keyword,
                &self.deps.tables.identifier_fields,
            )
            .await?;
        match page.records.len() {
            1 => Ok(page.records.into_iter().next().expect("len checked")),
            0 => Err(Error::RecordNotFound(keyword)),
            _ => Err(Error::Other(format!(
                "找到多条匹配「{keyword}」的记录，请先查询确认目标。"
            ))),
        }
    }

    /// Build the update diff. Configured append fields concatenate a
    /// date-prefixed fragment instead of replacing, and the diff records
    /// the delta.
    pub fn build_diff(
        &self,
        table_name: &str,
        old: &Record,
        fields: &BTreeMap<String, Value>,
    ) -> (BTreeMap<String, Value>, Vec<FieldChange>, Option<String>) {
        let table_type = self.deps.tables.table_type_of(table_name).unwrap_or("case");
        let append_rules = self
            .deps
            .tables
            .append_fields
            .get(table_type)
            .cloned()
            .unwrap_or_default();

        let mut effective = BTreeMap::new();
        let mut changes = Vec::new();
        let mut progress_append = None;

        for (name, value) in fields {
            let new_text = value_text(value);
            let old_text = old
                .fields_text
                .get(name)
                .cloned()
                .unwrap_or_default();
            let rule = append_rules.iter().find(|r| &r.field == name);
            match rule {
                Some(rule) => {
                    let fragment = if rule.date_prefix {
                        let today = Utc::now().with_timezone(&AGENT_TZ).format("%Y-%m-%d");
                        format!("[{today}] {new_text}")
                    } else {
                        new_text.clone()
                    };
                    let combined = if old_text.trim().is_empty() {
                        fragment.clone()
                    } else {
                        format!("{old_text}\n{fragment}")
                    };
                    effective.insert(name.clone(), Value::String(combined.clone()));
                    changes.push(FieldChange {
                        field: name.clone(),
                        old: old_text,
                        new: combined,
                        mode: ChangeMode::Append,
                        delta: Some(fragment.clone()),
                    });
                    progress_append = Some(fragment);
                }
                None => {
                    effective.insert(name.clone(), value.clone());
                    changes.push(FieldChange {
                        field: name.clone(),
                        old: old_text,
                        new: new_text,
                        mode: ChangeMode::Replace,
                        delta: None,
                    });
                }
            }
        }
        (effective, changes, progress_append)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn date_value_to_ms(value: &Value) -> Option<i64> {
    if let Some(ms) = value.as_i64() {
        return (ms > DATE_MS_THRESHOLD).then_some(ms);
    }
    let text = value.as_str()?.trim();
    let date = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let naive = date.and_hms_opt(9, 0, 0)?;
    AGENT_TZ
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
}
