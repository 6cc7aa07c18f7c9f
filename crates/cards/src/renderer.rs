//! Deterministic `SkillResult` → `RenderedResponse` assembly.
//!
//! Rule 1: there is always one paragraph block carrying a non-empty
//! fallback. Rule 2: mutation successes with flat scalar fields add a
//! kv_list of safe fields. Rule 3: the card template is selected from
//! `(skill_name, success, pending_action?, pending_delete?)`.

use std::collections::BTreeMap;

use serde_json::json;

use cf_domain::pending::{ActionKind, ActionPayload, PendingAction};
use cf_domain::types::{
    Block, CardTemplateSpec, KvItem, RenderedResponse, SkillResult,
};

use crate::template::{TemplateEngine, TemplateParams};

/// Keys never surfaced in kv lists (large/nested/sentinel payloads).
const KV_EXCLUDED: &[&str] = &["pending_action", "records", "record", "operations", "diff"];

const DEFAULT_CONFIRM_BODY: &str = "\
{{#if warning}}⚠ {{ warning }}\n{{/if}}{{ body }}";

pub struct CardRenderer {
    engine: TemplateEngine,
    assistant_name: String,
    query_list_style: String,
}

impl CardRenderer {
    pub fn new(engine: TemplateEngine, assistant_name: &str, query_list_style: &str) -> Self {
        Self {
            engine,
            assistant_name: assistant_name.to_owned(),
            query_list_style: query_list_style.to_owned(),
        }
    }

    pub fn render(&self, result: &SkillResult) -> RenderedResponse {
        let text_fallback = self.fallback_text(result);

        let mut blocks = vec![Block::Paragraph {
            text: text_fallback.clone(),
        }];
        if result.success && !result.data.fields.is_empty() {
            let items = self.safe_kv_items(&result.data.fields);
            if !items.is_empty() {
                blocks.push(Block::KvList { items });
            }
        }

        let mut meta = BTreeMap::new();
        meta.insert("assistant_name".to_owned(), self.assistant_name.clone());
        meta.insert("skill_name".to_owned(), result.skill_name.clone());
        if result.data.chitchat {
            meta.insert("chitchat".to_owned(), "true".to_owned());
        }

        RenderedResponse {
            text_fallback,
            blocks,
            meta,
            card_template: self.select_card_template(result),
        }
    }

    fn fallback_text(&self, result: &SkillResult) -> String {
        let reply = result.reply_text.trim();
        if !reply.is_empty() {
            return reply.to_owned();
        }
        let message = result.message.trim();
        if !message.is_empty() {
            return message.to_owned();
        }
        "请稍后重试。".to_owned()
    }

    fn safe_kv_items(&self, fields: &BTreeMap<String, String>) -> Vec<KvItem> {
        fields
            .iter()
            .filter(|(k, v)| {
                !KV_EXCLUDED.contains(&k.as_str()) && !v.trim().is_empty() && v.len() <= 200
            })
            .map(|(k, v)| KvItem {
                key: k.clone(),
                value: v.clone(),
            })
            .collect()
    }

    // ── template selection ───────────────────────────────────────────

    fn select_card_template(&self, result: &SkillResult) -> Option<CardTemplateSpec> {
        let data = &result.data;

        if !result.success {
            return Some(self.error_notice(result));
        }

        // Delete flow first: its confirm card outranks the generic one.
        if result.skill_name == "DeleteSkill" {
            if let Some(pending_delete) = &data.pending_delete {
                let mut params = BTreeMap::new();
                params.insert("summary".to_owned(), json!(pending_delete.summary));
                params.insert("warnings".to_owned(), json!(pending_delete.warnings));
                params.insert("suggestion".to_owned(), json!(pending_delete.suggestion));
                params.insert(
                    "confirm_type".to_owned(),
                    json!(pending_delete.confirm_type),
                );
                if let Some(action) = &data.pending_action {
                    params.insert(
                        "confirm_action".to_owned(),
                        json!(action.action.confirm_callback()),
                    );
                    params.insert(
                        "cancel_action".to_owned(),
                        json!(action.action.cancel_callback()),
                    );
                }
                return Some(spec("delete.confirm", params));
            }
            // Batch delete proposals carry no pending_delete payload but
            // still need a confirmation card.
            if let Some(action) = &data.pending_action {
                return Some(self.action_confirm(action, None));
            }
            if result.reply_text.contains("已取消") {
                return Some(spec("delete.cancelled", BTreeMap::new()));
            }
            let mut params = BTreeMap::new();
            if let Some(record_id) = &data.record_id {
                params.insert("record_id".to_owned(), json!(record_id));
            }
            return Some(spec("delete.success", params));
        }

        if let Some(action) = &data.pending_action {
            // Navigation pseudo-actions decorate the query card instead
            // of raising a confirmation.
            if action.action != ActionKind::QueryListNavigation {
                if data.guide {
                    return Some(spec("update.guide", BTreeMap::new()));
                }
                return Some(self.action_confirm(action, data.dedupe_warning.as_deref()));
            }
        }
        if data.guide {
            return Some(spec("update.guide", BTreeMap::new()));
        }

        match result.skill_name.as_str() {
            "QuerySkill" => {
                let records = data.records.as_deref().unwrap_or_default();
                if data.need_confirm.is_some() {
                    return None;
                }
                if records.len() == 1 {
                    let record = &records[0];
                    let mut params = BTreeMap::new();
                    params.insert("record_id".to_owned(), json!(record.record_id));
                    params.insert("record_url".to_owned(), json!(record.record_url));
                    params.insert("fields".to_owned(), json!(record.fields_text));
                    Some(spec("query.detail", params))
                } else {
                    let mut params = BTreeMap::new();
                    params.insert("style".to_owned(), json!(self.query_list_style));
                    if let Some(action) = &data.pending_action {
                        if let ActionPayload::Navigation { callbacks } = &action.payload {
                            params.insert(
                                "actions".to_owned(),
                                json!(callbacks.keys().collect::<Vec<_>>()),
                            );
                        }
                    }
                    params.insert(
                        "total".to_owned(),
                        json!(data.pagination.as_ref().map(|p| p.total).unwrap_or(0)),
                    );
                    params.insert(
                        "has_more".to_owned(),
                        json!(data.pagination.as_ref().map(|p| p.has_more).unwrap_or(false)),
                    );
                    params.insert(
                        "items".to_owned(),
                        json!(records
                            .iter()
                            .map(|r| json!({
                                "record_id": r.record_id,
                                "record_url": r.record_url,
                                "fields": r.fields_text,
                            }))
                            .collect::<Vec<_>>()),
                    );
                    Some(spec("query.list", params))
                }
            }
            "CreateSkill" => {
                let mut params = BTreeMap::new();
                if let Some(url) = &data.record_url {
                    params.insert("record_url".to_owned(), json!(url));
                }
                params.insert(
                    "auto_reminders".to_owned(),
                    json!(data.auto_reminders.len()),
                );
                Some(spec("create.success", params))
            }
            "UpdateSkill" => {
                let mut params = BTreeMap::new();
                params.insert(
                    "changes".to_owned(),
                    json!(data
                        .changes
                        .iter()
                        .map(|c| json!({
                            "field": c.field,
                            "old": c.old,
                            "new": c.new,
                            "mode": c.mode,
                        }))
                        .collect::<Vec<_>>()),
                );
                if let Some(append) = &data.progress_append {
                    params.insert("progress_append".to_owned(), json!(append));
                }
                if let Some(semantic) = &data.close_semantic {
                    params.insert("close_semantic".to_owned(), json!(semantic));
                }
                Some(spec("update.success", params))
            }
            _ => None,
        }
    }

    fn action_confirm(
        &self,
        action: &PendingAction,
        warning: Option<&str>,
    ) -> CardTemplateSpec {
        let mut params = BTreeMap::new();
        params.insert("action".to_owned(), json!(action.action.as_str()));
        params.insert(
            "confirm_action".to_owned(),
            json!(action.action.confirm_callback()),
        );
        params.insert(
            "cancel_action".to_owned(),
            json!(action.action.cancel_callback()),
        );
        if action.action.is_batch() {
            params.insert(
                "retry_action".to_owned(),
                json!(action.action.retry_callback()),
            );
            params.insert("operation_count".to_owned(), json!(action.operations.len()));
        }
        if let ActionPayload::Close { plan, .. } = &action.payload {
            params.insert("title".to_owned(), json!(plan.title));
            params.insert("target_status".to_owned(), json!(plan.target_status));
        }
        if let Some(warning) = warning {
            let mut tp = TemplateParams::new();
            tp.insert("warning".to_owned(), warning.to_owned());
            tp.insert("body".to_owned(), String::new());
            let body = self
                .engine
                .render_or_default("action/confirm.md", DEFAULT_CONFIRM_BODY, &tp);
            params.insert("warning".to_owned(), json!(warning));
            params.insert("warning_body".to_owned(), json!(body.trim()));
        }
        spec("action.confirm", params)
    }

    fn error_notice(&self, result: &SkillResult) -> CardTemplateSpec {
        let error_class = classify_error(
            result.data.error_code.as_deref(),
            &format!("{} {}", result.message, result.reply_text),
        );
        let mut params = BTreeMap::new();
        params.insert("error_class".to_owned(), json!(error_class));
        params.insert("message".to_owned(), json!(result.reply_text));
        spec("error.notice", params)
    }
}

fn spec(template_id: &str, params: BTreeMap<String, serde_json::Value>) -> CardTemplateSpec {
    CardTemplateSpec {
        template_id: template_id.to_owned(),
        version: "v1".to_owned(),
        params,
    }
}

/// Keyword matcher mapping a failure onto the four error classes.
pub fn classify_error(error_code: Option<&str>, message: &str) -> &'static str {
    match error_code {
        Some("missing_params") => return "missing_params",
        Some("record_not_found") => return "record_not_found",
        Some("permission_denied") => return "permission_denied",
        Some(_) => {}
        None => {}
    }
    if message.contains("缺少") || message.contains("请补充") {
        "missing_params"
    } else if message.contains("未找到") || message.contains("不存在") {
        "record_not_found"
    } else if message.contains("权限") {
        "permission_denied"
    } else {
        "general"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_domain::pending::{ActionKind, DeleteSummary, OperationEntry};
    use cf_domain::record::TableRef;
    use cf_domain::types::{NeedConfirm, PageInfo, PendingDelete, SkillData};

    fn renderer() -> CardRenderer {
        CardRenderer::new(TemplateEngine::new("/nonexistent", 16), "小敬", "v1")
    }

    fn record(id: &str) -> cf_domain::record::Record {
        let mut r = cf_domain::record::Record {
            record_id: id.into(),
            ..Default::default()
        };
        r.fields_text.insert("案号".into(), "(2024)粤0101民初100号".into());
        r
    }

    fn delete_payload() -> ActionPayload {
        ActionPayload::Delete {
            table: TableRef::new("tbl1", "案件项目总库"),
            record_id: "rec1".into(),
            summary: DeleteSummary::default(),
        }
    }

    #[test]
    fn always_emits_a_paragraph() {
        let result = SkillResult {
            success: true,
            skill_name: "ChitchatSkill".into(),
            ..Default::default()
        };
        let rendered = renderer().render(&result);
        assert!(!rendered.text_fallback.is_empty());
        assert!(matches!(rendered.blocks[0], Block::Paragraph { .. }));
    }

    #[test]
    fn failure_maps_to_error_notice_with_class() {
        let result = SkillResult::failure(
            "QuerySkill",
            "backend 404",
            "未找到目标记录，请先查询确认",
            "record_not_found",
        );
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "error.notice");
        assert_eq!(card.params["error_class"], "record_not_found");
    }

    #[test]
    fn delete_confirm_outranks_generic_action_confirm() {
        let mut data = SkillData::default();
        data.pending_action = Some(PendingAction::new(
            ActionKind::DeleteRecord,
            delete_payload(),
            chrono::Utc::now(),
            300,
        ));
        data.pending_delete = Some(PendingDelete {
            record_id: "rec1".into(),
            summary: "(2024)粤0101民初100号（合同纠纷）".into(),
            table_id: "tbl1".into(),
            warnings: vec!["该操作将永久删除记录".into()],
            suggestion: "如仅需结束流程，建议优先使用关闭/结案。".into(),
            confirm_type: "danger".into(),
        });
        let result = SkillResult::ok("DeleteSkill", "删除确认").with_data(data);
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "delete.confirm");
        assert_eq!(card.params["confirm_type"], "danger");
        assert_eq!(card.params["confirm_action"], "delete_record_confirm");
    }

    #[test]
    fn pending_action_selects_action_confirm() {
        let mut data = SkillData::default();
        data.pending_action = Some(
            PendingAction::new(
                ActionKind::BatchUpdateRecords,
                delete_payload(),
                chrono::Utc::now(),
                300,
            )
            .with_operations(vec![
                OperationEntry::new(0, delete_payload()),
                OperationEntry::new(1, delete_payload()),
            ]),
        );
        let result = SkillResult::ok("UpdateSkill", "确认执行").with_data(data);
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "action.confirm");
        assert_eq!(card.params["retry_action"], "batch_update_records_retry");
        assert_eq!(card.params["operation_count"], 2);
    }

    #[test]
    fn guide_state_selects_update_guide() {
        let mut data = SkillData::default();
        data.guide = true;
        let result = SkillResult::ok("UpdateSkill", "请告诉我要修改的字段").with_data(data);
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "update.guide");
    }

    #[test]
    fn multi_record_query_selects_list() {
        let mut data = SkillData::default();
        data.records = Some(vec![record("r1"), record("r2")]);
        data.pagination = Some(PageInfo {
            has_more: true,
            page_token: Some("tok".into()),
            total: 12,
            current_page: 1,
        });
        let result = SkillResult::ok("QuerySkill", "查询结果（共 12 条）").with_data(data);
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "query.list");
        assert_eq!(card.params["total"], 12);
        assert_eq!(card.params["has_more"], true);
    }

    #[test]
    fn single_record_query_selects_detail() {
        let mut data = SkillData::default();
        data.records = Some(vec![record("r1")]);
        data.pagination = Some(PageInfo::default());
        let result = SkillResult::ok("QuerySkill", "查询结果（共 1 条）").with_data(data);
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "query.detail");
        assert_eq!(card.params["record_id"], "r1");
    }

    #[test]
    fn need_confirm_renders_as_plain_text() {
        let mut data = SkillData::default();
        data.need_confirm = Some(NeedConfirm {
            candidates: vec!["合同管理表".into()],
            original_query: "看看合同".into(),
        });
        let result = SkillResult::ok("QuerySkill", "请回复表名确认").with_data(data);
        assert!(renderer().render(&result).card_template.is_none());
    }

    #[test]
    fn update_success_carries_diff_table() {
        let mut data = SkillData::default();
        data.changes = vec![cf_domain::pending::FieldChange {
            field: "进展".into(),
            old: "已立案".into(),
            new: "已立案\n[2024-09-10] 已开庭".into(),
            mode: cf_domain::pending::ChangeMode::Append,
            delta: Some("[2024-09-10] 已开庭".into()),
        }];
        data.progress_append = Some("[2024-09-10] 已开庭".into());
        let result = SkillResult::ok("UpdateSkill", "更新成功").with_data(data);
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "update.success");
        assert!(card.params["progress_append"]
            .as_str()
            .unwrap()
            .contains("已开庭"));
    }

    #[test]
    fn kv_list_excludes_sentinels_and_large_values() {
        let mut data = SkillData::default();
        data.fields.insert("案号".into(), "(2024)粤0101民初100号".into());
        data.fields.insert("records".into(), "…".into());
        data.fields.insert("大字段".into(), "x".repeat(500));
        let result = SkillResult::ok("CreateSkill", "创建成功").with_data(data);
        let rendered = renderer().render(&result);
        match &rendered.blocks[1] {
            Block::KvList { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].key, "案号");
            }
            other => panic!("expected kv_list, got {other:?}"),
        }
    }

    #[test]
    fn create_success_card_has_record_url() {
        let mut data = SkillData::default();
        data.record_url = Some("https://example.com/rec1".into());
        let result = SkillResult::ok("CreateSkill", "创建成功").with_data(data);
        let card = renderer().render(&result).card_template.unwrap();
        assert_eq!(card.template_id, "create.success");
        assert_eq!(card.params["record_url"], "https://example.com/rec1");
    }

    #[test]
    fn error_classifier_keywords() {
        assert_eq!(classify_error(None, "缺少案号，请补充"), "missing_params");
        assert_eq!(classify_error(None, "权限不足"), "permission_denied");
        assert_eq!(classify_error(None, "奇怪的错误"), "general");
        assert_eq!(
            classify_error(Some("record_not_found"), ""),
            "record_not_found"
        );
    }
}
