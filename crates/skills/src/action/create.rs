//! Create skill: propose a new record from a direct utterance.

use chrono::Utc;

use cf_domain::pending::{ActionKind, ActionPayload, PendingAction};
use cf_domain::types::{SkillContext, SkillData, SkillResult};

use crate::action::propose::ProposalBuilder;
use crate::skill::{Skill, SkillDeps};

pub struct CreateSkill {
    builder: ProposalBuilder,
}

impl CreateSkill {
    pub fn new(deps: SkillDeps) -> Self {
        Self {
            builder: ProposalBuilder::new(deps),
        }
    }
}

#[async_trait::async_trait]
impl Skill for CreateSkill {
    fn name(&self) -> &'static str {
        "CreateSkill"
    }

    async fn execute(&self, ctx: &SkillContext) -> SkillResult {
        let table = match self.builder.resolve_target_table(ctx).await {
            Ok(t) => t,
            Err(e) => {
                return SkillResult::failure(
                    "CreateSkill",
                    e.to_string(),
                    "无法确定要写入的数据表，请先说明表名。",
                    "missing_params",
                )
            }
        };
        if let Some(denied) = self.builder.write_denied_reason(&table.table_name) {
            return SkillResult::failure("CreateSkill", "write denied", denied, "permission_denied");
        }

        let mut fields = match self.builder.extract_fields(&ctx.query, &table.table_id).await {
            Ok(f) => f,
            Err(e) => {
                return SkillResult::failure(
                    "CreateSkill",
                    e.to_string(),
                    cf_domain::messages::user_message(e.error_code()),
                    e.error_code(),
                )
            }
        };
        if fields.is_empty() {
            return SkillResult::failure(
                "CreateSkill",
                "no fields extracted",
                "缺少记录内容，请补充要录入的字段，例如：新增案件，案号 xxx，委托人 xxx。",
                "missing_params",
            );
        }

        self.builder.apply_create_defaults(&table.table_name, &mut fields);
        let dedupe_warning = self.builder.dedupe_warning(&table, &fields).await;
        let reminders = self.builder.build_reminders(&table.table_id, &fields).await;

        let mut lines = vec![format!("将在「{}」新增一条记录：", table.table_name)];
        for (name, value) in &fields {
            let text = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
            lines.push(format!("• {name}：{text}"));
        }
        if let Some(warning) = &dedupe_warning {
            lines.push(format!("⚠ {warning}"));
        }
        lines.push("请确认后执行。".into());

        let action = PendingAction::new(
            ActionKind::CreateRecord,
            ActionPayload::Create {
                table: table.clone(),
                fields,
                dedupe_warning: dedupe_warning.clone(),
                reminders,
            },
            Utc::now(),
            self.builder.deps().pending_ttl_secs as i64,
        );

        let mut data = SkillData::default();
        data.pending_action = Some(action);
        data.active_table = Some(table);
        data.dedupe_warning = dedupe_warning;
        let mut result = SkillResult::ok("CreateSkill", lines.join("\n"));
        result.data = data;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bitable::testing::MockBitableClient;
    use cf_bitable::{FieldType, SchemaCache};
    use cf_cache::ManualClock;
    use cf_domain::config::{SkillsConfig, TablesConfig};
    use cf_llm::MockLlm;
    use std::sync::Arc;

    fn skill(client: Arc<MockBitableClient>, llm: Arc<MockLlm>) -> CreateSkill {
        CreateSkill::new(SkillDeps {
            client,
            schema: Arc::new(SchemaCache::new(600, Arc::new(ManualClock::new()))),
            llm,
            tables: Arc::new(TablesConfig::default()),
            skills: Arc::new(SkillsConfig::default()),
            pending_ttl_secs: 300,
        })
    }

    fn client() -> Arc<MockBitableClient> {
        Arc::new(
            MockBitableClient::new()
                .with_tables(&[("tbl1", "案件项目总库")])
                .with_fields(
                    "tbl1",
                    &[
                        ("案号", FieldType::Text),
                        ("委托人", FieldType::Text),
                        ("案件状态", FieldType::SingleSelect),
                    ],
                ),
        )
    }

    #[tokio::test]
    async fn propose_includes_fields_and_defaults() {
        let llm = Arc::new(MockLlm::new());
        llm.push_slots(&[("案号", "(2024)粤0101民初100号"), ("委托人", "张三")]);
        let skill = skill(client(), llm);

        let result = skill
            .execute(&SkillContext::new(
                "新增一个案件，案号(2024)粤0101民初100号，委托人 张三",
                "u1",
            ))
            .await;

        assert!(result.success);
        let action = result.data.pending_action.as_ref().unwrap();
        assert_eq!(action.action, ActionKind::CreateRecord);
        match &action.payload {
            ActionPayload::Create { fields, .. } => {
                assert_eq!(fields["案号"], serde_json::json!("(2024)粤0101民初100号"));
                assert_eq!(fields["委托人"], serde_json::json!("张三"));
                // Registered default applied.
                assert_eq!(fields["案件状态"], serde_json::json!("未结"));
            }
            other => panic!("expected create payload, got {other:?}"),
        }
        assert!(result.reply_text.contains("请确认后执行"));
    }

    #[tokio::test]
    async fn empty_extraction_is_missing_params() {
        let llm = Arc::new(MockLlm::new());
        llm.push_slots(&[]);
        let skill = skill(client(), llm);
        let result = skill.execute(&SkillContext::new("新增案件", "u1")).await;
        assert!(!result.success);
        assert_eq!(result.data.error_code.as_deref(), Some("missing_params"));
    }

    #[tokio::test]
    async fn read_only_table_is_denied() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl7", "团队成员工作总览")]),
        );
        let llm = Arc::new(MockLlm::new());
        let skill = skill(client, llm);
        let result = skill
            .execute(&SkillContext::new("新增团队成员工作总览一条", "u1"))
            .await;
        assert!(!result.success);
        assert_eq!(result.data.error_code.as_deref(), Some("permission_denied"));
    }
}
