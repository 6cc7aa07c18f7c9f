//! Stage 1 of the query pipeline: resolve which table the user means.
//!
//! Resolution order: explicit context, registered aliases, direct name
//! substring, domain hints, then an LLM pick with confidence bands
//! (accept / accept-with-notice / ask). A low-confidence pick parks the
//! candidates so the user's next reply can commit the choice.

use std::sync::Arc;

use cf_bitable::{BitableClient, TableInfo};
use cf_domain::config::{SkillsConfig, TablesConfig};
use cf_domain::record::TableRef;
use cf_domain::types::ContextExtra;
use cf_domain::Result;
use cf_llm::{LlmFacade, TablePick};

#[derive(Debug, Clone)]
pub enum TableResolution {
    Resolved {
        table: TableRef,
        /// Set when the pick was accepted below the high-confidence band.
        notice: Option<String>,
    },
    /// Ambiguous: ask the user, parking these candidates.
    NeedConfirm { candidates: Vec<String> },
}

pub struct TableResolver {
    client: Arc<dyn BitableClient>,
    llm: Arc<dyn LlmFacade>,
    tables: Arc<TablesConfig>,
    skills: Arc<SkillsConfig>,
}

impl TableResolver {
    pub fn new(
        client: Arc<dyn BitableClient>,
        llm: Arc<dyn LlmFacade>,
        tables: Arc<TablesConfig>,
        skills: Arc<SkillsConfig>,
    ) -> Self {
        Self {
            client,
            llm,
            tables,
            skills,
        }
    }

    /// A reply that names one parked candidate commits the choice.
    pub fn resolve_pending_choice(
        &self,
        query: &str,
        extra: &ContextExtra,
    ) -> Option<String> {
        let candidates = &extra.last_result.as_ref()?.candidates;
        if candidates.is_empty() {
            return None;
        }
        let query = query.trim();
        candidates
            .iter()
            .find(|c| query == c.as_str() || query.contains(c.as_str()) || c.contains(query))
            .cloned()
    }

    pub async fn resolve(
        &self,
        query: &str,
        extra: &ContextExtra,
        llm_allowed: bool,
    ) -> Result<TableResolution> {
        // A committed disambiguation reply wins over everything.
        if let Some(choice) = self.resolve_pending_choice(query, extra) {
            if let Some(info) = self.find_table(&choice).await? {
                return Ok(resolved(info, None));
            }
        }

        // Explicit context: the conversation's active table.
        if let Some(active) = &extra.active_table {
            if !active.table_id.is_empty() {
                return Ok(TableResolution::Resolved {
                    table: active.clone(),
                    notice: None,
                });
            }
        }

        let all_tables = self.client.list_tables().await?;

        // Registered alias map.
        for (alias, table_name) in &self.tables.table_aliases {
            if query.contains(alias.as_str()) {
                if let Some(info) = all_tables.iter().find(|t| &t.name == table_name) {
                    return Ok(resolved(info.clone(), None));
                }
            }
        }

        // Direct substring of a known table name.
        let name_hits: Vec<&TableInfo> = all_tables
            .iter()
            .filter(|t| query.contains(t.name.as_str()))
            .collect();
        if name_hits.len() == 1 {
            return Ok(resolved(name_hits[0].clone(), None));
        }
        if name_hits.len() > 1 {
            return Ok(TableResolution::NeedConfirm {
                candidates: name_hits.iter().map(|t| t.name.clone()).collect(),
            });
        }

        // Domain hints: type alias words map to the type's default table.
        for (table_type, aliases) in &self.tables.type_aliases {
            if aliases.iter().any(|a| query.contains(a.as_str())) {
                let matches: Vec<&TableInfo> = all_tables
                    .iter()
                    .filter(|t| aliases.iter().any(|a| t.name.contains(a.as_str())))
                    .collect();
                if matches.len() == 1 {
                    return Ok(resolved(matches[0].clone(), None));
                }
                if let Some(default_name) = self.tables.default_tables.get(table_type) {
                    if let Some(info) = all_tables.iter().find(|t| &t.name == default_name) {
                        return Ok(resolved(info.clone(), None));
                    }
                }
                if matches.len() > 1 {
                    return Ok(TableResolution::NeedConfirm {
                        candidates: matches.iter().map(|t| t.name.clone()).collect(),
                    });
                }
            }
        }

        // One table total: nothing to disambiguate.
        if all_tables.len() == 1 {
            return Ok(resolved(all_tables[0].clone(), None));
        }

        // LLM pick with confidence bands.
        if llm_allowed {
            if let Some(resolution) = self.llm_pick(query, &all_tables).await {
                return Ok(resolution);
            }
        }

        // No discriminator at all: fall back to the case default, else ask.
        if let Some(default_name) = self.tables.default_tables.get("case") {
            if let Some(info) = all_tables.iter().find(|t| &t.name == default_name) {
                return Ok(resolved(info.clone(), None));
            }
        }
        Ok(TableResolution::NeedConfirm {
            candidates: all_tables.iter().take(5).map(|t| t.name.clone()).collect(),
        })
    }

    async fn llm_pick(&self, query: &str, all_tables: &[TableInfo]) -> Option<TableResolution> {
        let names: Vec<&str> = all_tables.iter().map(|t| t.name.as_str()).collect();
        let prompt = format!(
            "用户想查询数据表。候选表：{}。用户消息：{query}。\
             输出 JSON：{{\"table_name\": \"...\", \"confidence\": 0-1, \"candidates\": [\"...\"]}}",
            names.join("、")
        );
        let reply = match self.llm.chat_json(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "table pick LLM call failed");
                return None;
            }
        };
        let pick: TablePick = serde_json::from_value(reply.value).unwrap_or_default();
        let Some(info) = all_tables.iter().find(|t| t.name == pick.table_name) else {
            return Some(TableResolution::NeedConfirm {
                candidates: normalize_candidates(&pick.candidates, all_tables),
            });
        };

        if pick.confidence >= self.skills.table_confidence_high {
            Some(resolved(info.clone(), None))
        } else if pick.confidence >= self.skills.table_confidence_low {
            Some(resolved(
                info.clone(),
                Some(format!("已按「{}」查询，如不对请告诉我表名。", info.name)),
            ))
        } else {
            let mut candidates = normalize_candidates(&pick.candidates, all_tables);
            if candidates.is_empty() {
                candidates = all_tables.iter().take(5).map(|t| t.name.clone()).collect();
            }
            Some(TableResolution::NeedConfirm { candidates })
        }
    }

    async fn find_table(&self, name: &str) -> Result<Option<TableInfo>> {
        let tables = self.client.list_tables().await?;
        Ok(tables.into_iter().find(|t| t.name == name))
    }

    /// Build the disambiguation prompt listing the parked candidates.
    pub fn confirmation_reply(&self, candidates: &[String]) -> String {
        let mut lines = vec!["找到多张可能的数据表，请回复表名确认：".to_owned()];
        for (i, name) in candidates.iter().enumerate() {
            lines.push(format!("{}. {name}", i + 1));
        }
        lines.join("\n")
    }
}

fn resolved(info: TableInfo, notice: Option<String>) -> TableResolution {
    TableResolution::Resolved {
        table: TableRef::new(info.table_id, info.name),
        notice,
    }
}

fn normalize_candidates(raw: &[String], all_tables: &[TableInfo]) -> Vec<String> {
    raw.iter()
        .filter(|c| all_tables.iter().any(|t| &t.name == *c))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bitable::testing::MockBitableClient;
    use cf_domain::types::LastResult;
    use cf_llm::MockLlm;
    use serde_json::json;

    fn resolver(tables: &[(&str, &str)]) -> (TableResolver, Arc<MockLlm>) {
        let llm = Arc::new(MockLlm::new());
        let client = Arc::new(MockBitableClient::new().with_tables(tables));
        (
            TableResolver::new(
                client,
                llm.clone(),
                Arc::new(TablesConfig::default()),
                Arc::new(SkillsConfig::default()),
            ),
            llm,
        )
    }

    #[tokio::test]
    async fn domain_hint_resolves_default_case_table() {
        let (resolver, _llm) = resolver(&[
            ("tbl1", "案件项目总库"),
            ("tbl2", "合同管理表"),
        ]);
        let res = resolver
            .resolve("查所有案件", &ContextExtra::default(), true)
            .await
            .unwrap();
        match res {
            TableResolution::Resolved { table, .. } => assert_eq!(table.table_id, "tbl1"),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn active_table_context_wins() {
        let (resolver, _llm) = resolver(&[("tbl1", "案件项目总库")]);
        let mut extra = ContextExtra::default();
        extra.active_table = Some(TableRef::new("tbl9", "招投标台账"));
        let res = resolver.resolve("再查一遍", &extra, true).await.unwrap();
        match res {
            TableResolution::Resolved { table, .. } => assert_eq!(table.table_id, "tbl9"),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ambiguous_name_substring_asks() {
        let (resolver, _llm) = resolver(&[
            ("tbl2", "合同管理表"),
            ("tbl3", "历史合同归档表"),
        ]);
        let res = resolver
            .resolve("看看合同管理表和历史合同归档表哪个", &ContextExtra::default(), false)
            .await
            .unwrap();
        match res {
            TableResolution::NeedConfirm { candidates } => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected need_confirm, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_choice_reply_commits() {
        let (resolver, _llm) = resolver(&[
            ("tbl2", "合同管理表"),
            ("tbl3", "历史合同归档表"),
        ]);
        let mut extra = ContextExtra::default();
        extra.last_result = Some(LastResult {
            records: Vec::new(),
            query: "看看合同".into(),
            candidates: vec!["合同管理表".into(), "历史合同归档表".into()],
        });
        let res = resolver.resolve("合同管理表", &extra, false).await.unwrap();
        match res {
            TableResolution::Resolved { table, .. } => assert_eq!(table.table_id, "tbl2"),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_pick_bands_apply() {
        let (resolver, llm) = resolver(&[
            ("tbl1", "文书库"),
            ("tbl2", "客户名录"),
        ]);
        llm.push_chat(json!({
            "table_name": "客户名录",
            "confidence": 0.72,
            "candidates": ["客户名录"]
        }));
        let res = resolver
            .resolve("查一下老客户", &ContextExtra::default(), true)
            .await
            .unwrap();
        match res {
            TableResolution::Resolved { table, notice } => {
                assert_eq!(table.table_name, "客户名录");
                assert!(notice.is_some());
            }
            other => panic!("expected resolved-with-notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_low_confidence_asks_with_candidates() {
        let (resolver, llm) = resolver(&[
            ("tbl1", "文书库"),
            ("tbl2", "客户名录"),
        ]);
        llm.push_chat(json!({
            "table_name": "文书库",
            "confidence": 0.4,
            "candidates": ["文书库", "客户名录"]
        }));
        let res = resolver
            .resolve("查一下那个东西", &ContextExtra::default(), true)
            .await
            .unwrap();
        match res {
            TableResolution::NeedConfirm { candidates } => {
                assert_eq!(candidates, vec!["文书库".to_string(), "客户名录".to_string()]);
            }
            other => panic!("expected need_confirm, got {other:?}"),
        }
    }
}
