//! Update skill: field updates, record closes (via per-table close
//! profiles), and the "which fields?" guide sub-state.

use chrono::Utc;

use cf_domain::pending::{
    ActionKind, ActionPayload, ClosePlan, DeleteSummary, PendingAction,
};
use cf_domain::record::Record;
use cf_domain::types::{SkillContext, SkillData, SkillResult};

use crate::action::propose::ProposalBuilder;
use crate::skill::{Skill, SkillDeps};

pub struct UpdateSkill {
    builder: ProposalBuilder,
}

impl UpdateSkill {
    pub fn new(deps: SkillDeps) -> Self {
        Self {
            builder: ProposalBuilder::new(deps),
        }
    }

    fn is_close_intent(&self, table_type: &str, query: &str) -> bool {
        let tables = &self.builder.deps().tables;
        if let Some(mapping) = tables.close_intent_mapping.get(table_type) {
            if mapping
                .values()
                .flatten()
                .any(|phrase| query.contains(phrase.as_str()))
            {
                return true;
            }
        }
        match table_type {
            "contracts" => query.contains("归档"),
            "bidding" => query.contains("关闭"),
            _ => false,
        }
    }

    fn wants_batch(query: &str) -> bool {
        query.contains("都") || query.contains("全部") || query.contains("批量") || query.contains("这些")
    }

    /// Batch proposal over the last query result: "把这些都结案" turns the
    /// parked list into one pending action with per-record operations.
    async fn try_propose_batch(
        &self,
        ctx: &SkillContext,
        table: &cf_domain::record::TableRef,
        table_type: &str,
    ) -> Option<SkillResult> {
        if !Self::wants_batch(&ctx.query) {
            return None;
        }
        let records = &ctx.extra.last_result.as_ref()?.records;
        if records.len() < 2 {
            return None;
        }

        let ttl = self.builder.deps().pending_ttl_secs as i64;
        let (kind, operations, title) = if self.is_close_intent(table_type, &ctx.query) {
            let tables = &self.builder.deps().tables;
            let semantic = tables.close_semantic_for(table_type, &ctx.query);
            let profile = tables.close_profile(table_type, &semantic)?;
            let plan = ClosePlan {
                semantic: semantic.clone(),
                title: profile.title.clone(),
                status_field: profile.status_field.clone(),
                target_status: profile.target_status.clone(),
                remove_from_open_list: profile.remove_from_open_list,
                reminder_policy: profile.reminder_policy.clone(),
            };
            let operations: Vec<cf_domain::pending::OperationEntry> = records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    cf_domain::pending::OperationEntry::new(
                        index,
                        ActionPayload::Close {
                            table: table.clone(),
                            record_id: record.record_id.clone(),
                            plan: plan.clone(),
                            summary: Self::summary_of(record),
                        },
                    )
                })
                .collect();
            (
                ActionKind::BatchCloseRecords,
                operations,
                profile.title.clone(),
            )
        } else {
            let fields = self
                .builder
                .extract_fields(&ctx.query, &table.table_id)
                .await
                .ok()?;
            if fields.is_empty() {
                return None;
            }
            let operations: Vec<cf_domain::pending::OperationEntry> = records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    let (effective, diff, _) =
                        self.builder.build_diff(&table.table_name, record, &fields);
                    cf_domain::pending::OperationEntry::new(
                        index,
                        ActionPayload::Update {
                            table: table.clone(),
                            record_id: record.record_id.clone(),
                            fields: effective,
                            diff,
                            reminders: Vec::new(),
                        },
                    )
                })
                .collect();
            (ActionKind::BatchUpdateRecords, operations, "批量更新".to_owned())
        };

        let count = operations.len();
        let first_payload = operations[0].payload.clone();
        let action = PendingAction::new(kind, first_payload, chrono::Utc::now(), ttl)
            .with_operations(operations);

        let mut data = SkillData::default();
        data.pending_action = Some(action);
        data.active_table = Some(table.clone());
        let mut result = SkillResult::ok(
            "UpdateSkill",
            format!("将对 {count} 条记录执行「{title}」，请确认后执行。"),
        );
        result.data = data;
        Some(result)
    }

    fn guide_result(&self) -> SkillResult {
        let mut data = SkillData::default();
        data.guide = true;
        let mut result = SkillResult::ok(
            "UpdateSkill",
            "请告诉我要修改的字段和新值，例如：把进展更新为已开庭。",
        );
        result.data = data;
        result
    }

    fn summary_of(record: &Record) -> DeleteSummary {
        DeleteSummary {
            case_no: record.pick_text(&["案号", "合同编号", "项目编号"]),
            cause: record.pick_text(&["案由", "合同名称", "项目名称"]),
        }
    }

    async fn propose_close(
        &self,
        ctx: &SkillContext,
        table: cf_domain::record::TableRef,
        table_type: &str,
        record: Record,
    ) -> SkillResult {
        let tables = &self.builder.deps().tables;
        let semantic = tables.close_semantic_for(table_type, &ctx.query);
        let Some(profile) = tables.close_profile(table_type, &semantic) else {
            return SkillResult::failure(
                "UpdateSkill",
                format!("no close profile for {table_type}"),
                "该类型数据暂不支持结案/归档操作。",
                "missing_params",
            );
        };

        let summary = Self::summary_of(&record);
        let mut lines = vec![format!("{}确认：{}", profile.title, summary.case_no)];
        if !summary.cause.is_empty() {
            lines.push(format!("案由：{}", summary.cause));
        }
        for consequence in &profile.consequences {
            lines.push(format!("• {consequence}"));
        }

        let action = PendingAction::new(
            ActionKind::CloseRecord,
            ActionPayload::Close {
                table: table.clone(),
                record_id: record.record_id.clone(),
                plan: ClosePlan {
                    semantic: semantic.clone(),
                    title: profile.title.clone(),
                    status_field: profile.status_field.clone(),
                    target_status: profile.target_status.clone(),
                    remove_from_open_list: profile.remove_from_open_list,
                    reminder_policy: profile.reminder_policy.clone(),
                },
                summary,
            },
            Utc::now(),
            self.builder.deps().pending_ttl_secs as i64,
        );

        let mut data = SkillData::default();
        data.pending_action = Some(action);
        data.close_semantic = Some(semantic);
        data.active_table = Some(table);
        let mut result = SkillResult::ok("UpdateSkill", lines.join("\n"));
        result.data = data;
        result
    }
}

#[async_trait::async_trait]
impl Skill for UpdateSkill {
    fn name(&self) -> &'static str {
        "UpdateSkill"
    }

    async fn execute(&self, ctx: &SkillContext) -> SkillResult {
        if ctx.extra.update_guide {
            return self.guide_result();
        }

        let table = match self.builder.resolve_target_table(ctx).await {
            Ok(t) => t,
            Err(e) => {
                return SkillResult::failure(
                    "UpdateSkill",
                    e.to_string(),
                    "无法确定目标数据表，请先查询定位记录。",
                    "missing_params",
                )
            }
        };
        if let Some(denied) = self.builder.write_denied_reason(&table.table_name) {
            return SkillResult::failure("UpdateSkill", "write denied", denied, "permission_denied");
        }
        let table_type = self
            .builder
            .deps()
            .tables
            .table_type_of(&table.table_name)
            .unwrap_or("case")
            .to_owned();

        if let Some(batch) = self.try_propose_batch(ctx, &table, &table_type).await {
            return batch;
        }

        let record = match self.builder.locate_record(ctx, &table).await {
            Ok(r) => r,
            Err(e) => {
                return SkillResult::failure(
                    "UpdateSkill",
                    e.to_string(),
                    cf_domain::messages::user_message("record_not_found"),
                    "record_not_found",
                )
            }
        };

        if self.is_close_intent(&table_type, &ctx.query) {
            return self.propose_close(ctx, table, &table_type, record).await;
        }

        let fields = match self.builder.extract_fields(&ctx.query, &table.table_id).await {
            Ok(f) => f,
            Err(e) => {
                return SkillResult::failure(
                    "UpdateSkill",
                    e.to_string(),
                    cf_domain::messages::user_message(e.error_code()),
                    e.error_code(),
                )
            }
        };
        if fields.is_empty() {
            return self.guide_result();
        }

        let (effective, changes, _progress) =
            self.builder.build_diff(&table.table_name, &record, &fields);
        let reminders = self
            .builder
            .build_reminders(&table.table_id, &effective)
            .await;

        let summary = Self::summary_of(&record);
        let mut lines = vec![format!("将更新 {}：", summary.case_no)];
        for change in &changes {
            match &change.delta {
                Some(delta) => lines.push(format!("• {}：追加 {delta}", change.field)),
                None => lines.push(format!(
                    "• {}：{} → {}",
                    change.field, change.old, change.new
                )),
            }
        }
        lines.push("请确认后执行。".into());

        let action = PendingAction::new(
            ActionKind::UpdateRecord,
            ActionPayload::Update {
                table: table.clone(),
                record_id: record.record_id.clone(),
                fields: effective,
                diff: changes.clone(),
                reminders,
            },
            Utc::now(),
            self.builder.deps().pending_ttl_secs as i64,
        );

        let mut data = SkillData::default();
        data.pending_action = Some(action);
        data.changes = changes;
        data.active_table = Some(table);
        let mut result = SkillResult::ok("UpdateSkill", lines.join("\n"));
        result.data = data;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bitable::testing::{record_with_fields, MockBitableClient};
    use cf_bitable::{FieldType, SchemaCache};
    use cf_cache::ManualClock;
    use cf_domain::config::{SkillsConfig, TablesConfig};
    use cf_domain::types::ActiveRecord;
    use cf_llm::MockLlm;
    use std::sync::Arc;

    fn skill(client: Arc<MockBitableClient>, llm: Arc<MockLlm>) -> UpdateSkill {
        UpdateSkill::new(SkillDeps {
            client,
            schema: Arc::new(SchemaCache::new(600, Arc::new(ManualClock::new()))),
            llm,
            tables: Arc::new(TablesConfig::default()),
            skills: Arc::new(SkillsConfig::default()),
            pending_ttl_secs: 300,
        })
    }

    fn ctx_with_active(query: &str) -> SkillContext {
        let record = record_with_fields(
            "rec1",
            &[
                ("案号", "(2024)粤0101民初100号"),
                ("案由", "合同纠纷"),
                ("进展", "[2024-08-01] 已立案"),
            ],
        );
        let mut ctx = SkillContext::new(query, "u1");
        ctx.extra.active_table = Some(cf_domain::record::TableRef::new("tbl1", "案件项目总库"));
        ctx.extra.active_record = Some(ActiveRecord {
            record_id: "rec1".into(),
            record,
            table_id: "tbl1".into(),
            table_name: "案件项目总库".into(),
            source: "query".into(),
        });
        ctx
    }

    fn client() -> Arc<MockBitableClient> {
        Arc::new(
            MockBitableClient::new()
                .with_tables(&[("tbl1", "案件项目总库")])
                .with_fields(
                    "tbl1",
                    &[("进展", FieldType::Text), ("案件状态", FieldType::SingleSelect)],
                ),
        )
    }

    #[tokio::test]
    async fn guide_mode_returns_guide_card() {
        let skill = skill(client(), Arc::new(MockLlm::new()));
        let mut ctx = ctx_with_active("");
        ctx.extra.update_guide = true;
        let result = skill.execute(&ctx).await;
        assert!(result.success);
        assert!(result.data.guide);
    }

    #[tokio::test]
    async fn progress_update_proposes_append_diff() {
        let llm = Arc::new(MockLlm::new());
        llm.push_slots(&[("进展", "已开庭")]);
        let skill = skill(client(), llm);
        let result = skill
            .execute(&ctx_with_active("把进展更新为已开庭"))
            .await;

        assert!(result.success);
        let action = result.data.pending_action.as_ref().unwrap();
        assert_eq!(action.action, ActionKind::UpdateRecord);
        match &action.payload {
            ActionPayload::Update { diff, .. } => {
                assert_eq!(diff[0].mode, cf_domain::pending::ChangeMode::Append);
                assert!(diff[0].delta.as_ref().unwrap().contains("已开庭"));
            }
            other => panic!("expected update payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_phrase_proposes_default_profile() {
        let skill = skill(client(), Arc::new(MockLlm::new()));
        let result = skill.execute(&ctx_with_active("这个案子结案了")).await;

        assert!(result.success);
        let action = result.data.pending_action.as_ref().unwrap();
        assert_eq!(action.action, ActionKind::CloseRecord);
        match &action.payload {
            ActionPayload::Close { plan, .. } => {
                assert_eq!(plan.semantic, "default");
                assert_eq!(plan.target_status, "已结案");
                assert!(plan.remove_from_open_list);
            }
            other => panic!("expected close payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn enforcement_end_phrase_preserves_open_list() {
        let skill = skill(client(), Arc::new(MockLlm::new()));
        let result = skill
            .execute(&ctx_with_active("这个案子执行终本了"))
            .await;

        let action = result.data.pending_action.as_ref().unwrap();
        match &action.payload {
            ActionPayload::Close { plan, .. } => {
                assert_eq!(plan.semantic, "enforcement_end");
                assert_eq!(plan.target_status, "执行终本");
                assert!(!plan.remove_from_open_list);
                assert_eq!(plan.reminder_policy, "preserve_seizure");
            }
            other => panic!("expected close payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_close_over_last_result() {
        let skill = skill(client(), Arc::new(MockLlm::new()));
        let mut ctx = ctx_with_active("把这些案子都结案");
        ctx.extra.active_record = None;
        ctx.extra.last_result = Some(cf_domain::types::LastResult {
            records: vec![
                record_with_fields("rec1", &[("案号", "(2024)粤0101民初101号")]),
                record_with_fields("rec2", &[("案号", "(2024)粤0101民初102号")]),
                record_with_fields("rec3", &[("案号", "(2024)粤0101民初103号")]),
            ],
            query: "查未结案件".into(),
            candidates: Vec::new(),
        });

        let result = skill.execute(&ctx).await;
        assert!(result.success);
        let action = result.data.pending_action.as_ref().unwrap();
        assert_eq!(action.action, ActionKind::BatchCloseRecords);
        assert_eq!(action.operations.len(), 3);
        assert!(action
            .operations
            .iter()
            .enumerate()
            .all(|(i, e)| e.index == i));
        assert!(result.reply_text.contains("3 条"));
    }

    #[tokio::test]
    async fn empty_extraction_yields_guide() {
        let llm = Arc::new(MockLlm::new());
        llm.push_slots(&[]);
        let skill = skill(client(), llm);
        let result = skill.execute(&ctx_with_active("改一下这条记录")).await;
        assert!(result.success);
        assert!(result.data.guide);
    }
}
