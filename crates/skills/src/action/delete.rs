//! Delete skill: danger-confirmed record deletion with a suggested
//! alternative (prefer close).

use chrono::Utc;

use cf_domain::pending::{ActionKind, ActionPayload, DeleteSummary, PendingAction};
use cf_domain::types::{PendingDelete, SkillContext, SkillData, SkillResult};

use crate::action::propose::ProposalBuilder;
use crate::skill::{Skill, SkillDeps};

pub struct DeleteSkill {
    builder: ProposalBuilder,
}

impl DeleteSkill {
    pub fn new(deps: SkillDeps) -> Self {
        Self {
            builder: ProposalBuilder::new(deps),
        }
    }
}

impl DeleteSkill {
    fn propose_batch_delete(
        &self,
        table: &cf_domain::record::TableRef,
        records: &[cf_domain::record::Record],
    ) -> SkillResult {
        let operations: Vec<cf_domain::pending::OperationEntry> = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                cf_domain::pending::OperationEntry::new(
                    index,
                    ActionPayload::Delete {
                        table: table.clone(),
                        record_id: record.record_id.clone(),
                        summary: DeleteSummary {
                            case_no: record.pick_text(&["案号", "合同编号", "项目编号"]),
                            cause: record.pick_text(&["案由", "合同名称", "项目名称"]),
                        },
                    },
                )
            })
            .collect();

        let count = operations.len();
        let first_payload = operations[0].payload.clone();
        let action = PendingAction::new(
            ActionKind::BatchDeleteRecords,
            first_payload,
            Utc::now(),
            self.builder.deps().pending_ttl_secs as i64,
        )
        .with_operations(operations);

        let mut data = SkillData::default();
        data.pending_action = Some(action);
        data.active_table = Some(table.clone());
        let mut result = SkillResult::ok(
            "DeleteSkill",
            format!("将删除 {count} 条记录，该操作不可撤销，请确认后执行。"),
        );
        result.data = data;
        result
    }
}

#[async_trait::async_trait]
impl Skill for DeleteSkill {
    fn name(&self) -> &'static str {
        "DeleteSkill"
    }

    async fn execute(&self, ctx: &SkillContext) -> SkillResult {
        let table = match self.builder.resolve_target_table(ctx).await {
            Ok(t) => t,
            Err(e) => {
                return SkillResult::failure(
                    "DeleteSkill",
                    e.to_string(),
                    "无法确定目标数据表，请先查询定位记录。",
                    "missing_params",
                )
            }
        };
        if let Some(denied) = self.builder.write_denied_reason(&table.table_name) {
            return SkillResult::failure("DeleteSkill", "write denied", denied, "permission_denied");
        }

        // "把这些都删了" over a parked multi-record result becomes a batch
        // delete with per-record operations.
        if ctx.query.contains("都") || ctx.query.contains("全部") || ctx.query.contains("批量") {
            if let Some(last) = &ctx.extra.last_result {
                if last.records.len() >= 2 {
                    return self.propose_batch_delete(&table, &last.records);
                }
            }
        }

        let record = match self.builder.locate_record(ctx, &table).await {
            Ok(r) => r,
            Err(e) => {
                return SkillResult::failure(
                    "DeleteSkill",
                    e.to_string(),
                    cf_domain::messages::user_message("record_not_found"),
                    "record_not_found",
                )
            }
        };

        let table_type = self
            .builder
            .deps()
            .tables
            .table_type_of(&table.table_name)
            .unwrap_or("default");
        let profile = self.builder.deps().tables.delete_profile(table_type);
        let summary = DeleteSummary {
            case_no: record.pick_text(&["案号", "合同编号", "项目编号"]),
            cause: record.pick_text(&["案由", "合同名称", "项目名称"]),
        };

        let mut lines = vec![profile.title.clone(), profile.subtitle.clone()];
        let display = if summary.case_no.is_empty() {
            record.record_id.clone()
        } else {
            summary.case_no.clone()
        };
        lines.push(format!("目标记录：{display}"));
        for warning in &profile.warnings {
            lines.push(format!("⚠ {warning}"));
        }
        if !profile.suggestion.is_empty() {
            lines.push(profile.suggestion.clone());
        }

        let summary_text = if summary.cause.is_empty() {
            display.clone()
        } else {
            format!("{display}（{}）", summary.cause)
        };

        let action = PendingAction::new(
            ActionKind::DeleteRecord,
            ActionPayload::Delete {
                table: table.clone(),
                record_id: record.record_id.clone(),
                summary,
            },
            Utc::now(),
            self.builder.deps().pending_ttl_secs as i64,
        );

        let mut data = SkillData::default();
        data.pending_action = Some(action);
        data.pending_delete = Some(PendingDelete {
            record_id: record.record_id.clone(),
            summary: summary_text,
            table_id: table.table_id.clone(),
            warnings: profile.warnings.clone(),
            suggestion: profile.suggestion.clone(),
            confirm_type: profile.confirm_type.clone(),
        });
        data.active_table = Some(table);
        let mut result = SkillResult::ok("DeleteSkill", lines.join("\n"));
        result.data = data;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bitable::testing::{page_of, record_with_fields, MockBitableClient, Scripted};
    use cf_bitable::SchemaCache;
    use cf_cache::ManualClock;
    use cf_domain::config::{SkillsConfig, TablesConfig};
    use cf_llm::MockLlm;
    use std::sync::Arc;

    fn skill(client: Arc<MockBitableClient>) -> DeleteSkill {
        DeleteSkill::new(SkillDeps {
            client,
            schema: Arc::new(SchemaCache::new(600, Arc::new(ManualClock::new()))),
            llm: Arc::new(MockLlm::new()),
            tables: Arc::new(TablesConfig::default()),
            skills: Arc::new(SkillsConfig::default()),
            pending_ttl_secs: 300,
        })
    }

    #[tokio::test]
    async fn delete_proposal_carries_danger_confirm() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        client.script(
            "search_keyword",
            Scripted::Page(page_of(vec![record_with_fields(
                "rec1",
                &[("案号", "(2024)粤0101民初100号"), ("案由", "合同纠纷")],
            )])),
        );
        let skill = skill(client);
        let result = skill
            .execute(&SkillContext::new("删除案件(2024)粤0101民初100号", "u1"))
            .await;

        assert!(result.success);
        let pending_delete = result.data.pending_delete.as_ref().unwrap();
        assert_eq!(pending_delete.confirm_type, "danger");
        assert!(pending_delete.summary.contains("合同纠纷"));
        let action = result.data.pending_action.as_ref().unwrap();
        assert_eq!(action.action, ActionKind::DeleteRecord);
        assert!(result.reply_text.contains("不可撤销"));
        assert!(result.reply_text.contains("建议优先使用关闭/结案"));
    }

    #[tokio::test]
    async fn batch_delete_over_last_result() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        let skill = skill(client);
        let mut ctx = SkillContext::new("把这些案件都删掉", "u1");
        ctx.extra.last_result = Some(cf_domain::types::LastResult {
            records: vec![
                record_with_fields("rec1", &[("案号", "(2024)粤0101民初101号")]),
                record_with_fields("rec2", &[("案号", "(2024)粤0101民初102号")]),
            ],
            query: "查案件".into(),
            candidates: Vec::new(),
        });

        let result = skill.execute(&ctx).await;
        assert!(result.success);
        let action = result.data.pending_action.as_ref().unwrap();
        assert_eq!(action.action, ActionKind::BatchDeleteRecords);
        assert_eq!(action.operations.len(), 2);
        assert!(result.reply_text.contains("不可撤销"));
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        let skill = skill(client);
        let result = skill
            .execute(&SkillContext::new("删除案件 AJ-99999999", "u1"))
            .await;
        assert!(!result.success);
        assert_eq!(result.data.error_code.as_deref(), Some("record_not_found"));
    }
}
