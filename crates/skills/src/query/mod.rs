//! The query skill: table disambiguation, query compilation, execution
//! with fallback, and post-processing.

pub mod compiler;
pub mod semantic;
pub mod tables;

pub use compiler::{CompiledQuery, CompileOutcome, QueryCompiler, TraceEntry};
pub use tables::{TableResolution, TableResolver};

use std::time::Instant;

use chrono::{TimeZone, Utc};

use cf_bitable::{format_record, ScanParams, SearchPage};
use cf_domain::metric::MetricEvent;
use cf_domain::pending::{ActionKind, ActionPayload, NavigationTarget, PendingAction};
use cf_domain::record::{FieldValue, Record, TableRef};
use cf_domain::types::{
    ActiveRecord, NeedConfirm, PageInfo, PaginationCursor, SkillContext, SkillData, SkillResult,
};
use cf_domain::{Error, Result, AGENT_TZ};

use crate::skill::{Skill, SkillDeps};

/// Navigation buttons live exactly as long as the parked result list.
const NAVIGATION_TTL_SECS: i64 = 600;

pub struct QuerySkill {
    deps: SkillDeps,
    resolver: TableResolver,
    compiler: QueryCompiler,
    local_scan_max_pages: u32,
    page_size: u32,
    /// Records shown in the text reply before the truncation hint.
    display_limit: usize,
}

impl QuerySkill {
    pub fn new(deps: SkillDeps, local_scan_max_pages: u32, page_size: u32) -> Self {
        let resolver = TableResolver::new(
            deps.client.clone(),
            deps.llm.clone(),
            deps.tables.clone(),
            deps.skills.clone(),
        );
        let compiler = QueryCompiler::new(deps.tables.clone(), deps.skills.clone());
        Self {
            deps,
            resolver,
            compiler,
            local_scan_max_pages,
            page_size,
            display_limit: 5,
        }
    }

    pub fn with_display_limit(mut self, limit: usize) -> Self {
        self.display_limit = limit.max(1);
        self
    }

    fn is_refresh_command(query: &str) -> bool {
        query.contains("刷新表格") || query.contains("刷新缓存") || query.contains("刷新元数据")
    }

    async fn refresh_tables(&self) -> SkillResult {
        self.deps.client.invalidate_metadata();
        match self.deps.client.list_tables().await {
            Ok(tables) => SkillResult::ok(
                "QuerySkill",
                format!("表格缓存已刷新，共 {} 张数据表。", tables.len()),
            ),
            Err(e) => SkillResult::failure(
                "QuerySkill",
                e.to_string(),
                "刷新失败，请稍后重试。",
                e.error_code(),
            ),
        }
    }

    // ── stage 3: execution ───────────────────────────────────────────

    async fn run_query(
        &self,
        table: &TableRef,
        compiled: &CompiledQuery,
    ) -> Result<(SearchPage, Option<String>)> {
        let started = Instant::now();
        let first = self.dispatch(table, compiled).await;
        MetricEvent::BitableQueryLatencySeconds {
            tool: compiled.tool_name().into(),
            seconds: started.elapsed().as_secs_f64(),
        }
        .emit();

        match first {
            Ok(page) => Ok((page, None)),
            Err(Error::FilterNotSupported(_)) => self.run_fallback(table, compiled).await,
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&self, table: &TableRef, compiled: &CompiledQuery) -> Result<SearchPage> {
        let client = &self.deps.client;
        match compiled {
            CompiledQuery::Scan {
                ignore_default_view,
                page_token,
            } => {
                client
                    .search(
                        &table.table_id,
                        &ScanParams {
                            view_id: None,
                            ignore_default_view: *ignore_default_view,
                            page_size: self.page_size,
                            page_token: page_token.clone(),
                        },
                    )
                    .await
            }
            CompiledQuery::ExactMatch { field, value } => {
                client.search_exact(&table.table_id, field, value).await
            }
            CompiledQuery::Keyword {
                keyword, fields, ..
            } => client.search_keyword(&table.table_id, keyword, fields).await,
            CompiledQuery::Person {
                fields,
                open_id,
                user_name,
            } => {
                // Fall through the identity-field list until one matches.
                let mut last_empty = SearchPage::default();
                for field in fields {
                    let page = client
                        .search_person(
                            &table.table_id,
                            field,
                            Some(open_id.as_str()),
                            Some(user_name.as_str()),
                        )
                        .await?;
                    if !page.records.is_empty() {
                        return Ok(page);
                    }
                    last_empty = page;
                }
                Ok(last_empty)
            }
            CompiledQuery::DateRange {
                field,
                from,
                to,
                time_from,
                time_to,
            } => {
                client
                    .search_date_range(
                        &table.table_id,
                        field,
                        from.as_deref(),
                        to.as_deref(),
                        time_from.as_deref(),
                        time_to.as_deref(),
                    )
                    .await
            }
        }
    }

    /// Filter-not-supported policy: retry with a downgraded operator,
    /// then page the table and filter locally (bounded).
    async fn run_fallback(
        &self,
        table: &TableRef,
        compiled: &CompiledQuery,
    ) -> Result<(SearchPage, Option<String>)> {
        // Operator downgrade: exact → contains.
        if let CompiledQuery::ExactMatch { field, value } = compiled {
            let downgraded = CompiledQuery::Keyword {
                keyword: value.clone(),
                fields: vec![field.clone()],
                org_filter: false,
            };
            if let Ok(page) = self.dispatch(table, &downgraded).await {
                return Ok((page, Some("operator_downgrade".into())));
            }
        }

        // Bounded local scan.
        let mut collected: Vec<Record> = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..self.local_scan_max_pages {
            let page = self
                .deps
                .client
                .search(
                    &table.table_id,
                    &ScanParams {
                        view_id: None,
                        ignore_default_view: true,
                        page_size: self.page_size,
                        page_token: page_token.clone(),
                    },
                )
                .await?;
            collected.extend(
                page.records
                    .into_iter()
                    .filter(|r| local_match(r, compiled)),
            );
            if !page.has_more || page.page_token.is_none() {
                page_token = None;
                break;
            }
            page_token = page.page_token;
        }
        let total = collected.len() as u64;
        Ok((
            SearchPage {
                records: collected,
                has_more: page_token.is_some(),
                page_token,
                total,
                schema: Vec::new(),
            },
            Some("local_scan".into()),
        ))
    }

    // ── stage 4: post-processing ─────────────────────────────────────

    fn post_process(&self, compiled: &CompiledQuery, mut records: Vec<Record>) -> Vec<Record> {
        if let CompiledQuery::Keyword {
            keyword,
            org_filter,
            ..
        } = compiled
        {
            if *org_filter {
                // Reject noisy matches sitting only in free-text fields.
                records.retain(|r| {
                    self.deps
                        .tables
                        .high_priority_party_fields
                        .iter()
                        .any(|f| r.text(f).contains(keyword.as_str()))
                });
            }
            // Relevance reorder: title/case-number hits weigh 3.
            let title_fields = &self.deps.tables.title_fields;
            let mut scored: Vec<(u32, Record)> = records
                .into_iter()
                .map(|r| {
                    let mut score = 0u32;
                    for (name, text) in &r.fields_text {
                        if text.contains(keyword.as_str()) {
                            score += if title_fields.contains(name) { 3 } else { 1 };
                        }
                    }
                    (score, r)
                })
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            records = scored.into_iter().map(|(_, r)| r).collect();
        }
        records
    }

    fn navigation_action(&self, has_more: bool) -> PendingAction {
        let mut callbacks = std::collections::BTreeMap::new();
        callbacks.insert(
            "query_list_next_page".to_owned(),
            if has_more {
                NavigationTarget {
                    kind: "query".into(),
                    query: "下一页".into(),
                    text: String::new(),
                    page_token: None,
                }
            } else {
                NavigationTarget {
                    kind: "notice".into(),
                    query: String::new(),
                    text: "已经是最后一页了。".into(),
                    page_token: None,
                }
            },
        );
        callbacks.insert(
            "query_list_today_hearing".to_owned(),
            NavigationTarget {
                kind: "query".into(),
                query: "今天开庭的案件".into(),
                text: String::new(),
                page_token: None,
            },
        );
        callbacks.insert(
            "query_list_week_hearing".to_owned(),
            NavigationTarget {
                kind: "query".into(),
                query: "本周开庭的案件".into(),
                text: String::new(),
                page_token: None,
            },
        );
        // Matches the last_result TTL so the buttons expire with the list.
        PendingAction::new(
            ActionKind::QueryListNavigation,
            ActionPayload::Navigation { callbacks },
            Utc::now(),
            NAVIGATION_TTL_SECS,
        )
    }

    fn render_reply(&self, table: &TableRef, records: &[Record], total: u64) -> String {
        if records.is_empty() {
            return format!("{}查询结果（共 0 条）：未找到相关记录，可尝试更换关键词。", table.table_name);
        }
        let mut lines = vec![format!(
            "{}查询结果（共 {} 条）",
            table.table_name, total
        )];
        for (i, record) in records.iter().take(self.display_limit).enumerate() {
            let title = record.pick_text(&["案号", "项目名称", "合同编号", "项目编号"]);
            let cause = record.pick_text(&["案由", "项目类型", "合同名称"]);
            let status = record.pick_text(&["案件状态", "合同状态", "状态"]);
            let mut parts: Vec<String> = Vec::new();
            if !title.is_empty() {
                parts.push(title);
            }
            if !cause.is_empty() {
                parts.push(cause);
            }
            if !status.is_empty() {
                parts.push(status);
            }
            if parts.is_empty() {
                parts.push(record.record_id.clone());
            }
            lines.push(format!("{}. {}", i + 1, parts.join(" | ")));
        }
        if records.len() > self.display_limit {
            lines.push(format!(
                "（仅显示前 {} 条，共 {} 条，可回复「下一页」查看更多）",
                self.display_limit, total
            ));
        }
        lines.join("\n")
    }
}

/// Local predicate mirroring the backend filter, used by the scan
/// fallback.
fn local_match(record: &Record, compiled: &CompiledQuery) -> bool {
    match compiled {
        CompiledQuery::Scan { .. } => true,
        CompiledQuery::ExactMatch { field, value } => {
            let text = record.text(field);
            text == value || text.contains(value.as_str())
        }
        CompiledQuery::Keyword {
            keyword, fields, ..
        } => fields
            .iter()
            .any(|f| record.text(f).contains(keyword.as_str())),
        CompiledQuery::Person {
            fields,
            open_id,
            user_name,
        } => fields.iter().any(|f| match record.fields.get(f) {
            Some(FieldValue::Persons(ps)) => ps
                .iter()
                .any(|p| p.id == *open_id || (!user_name.is_empty() && p.name == *user_name)),
            _ => false,
        }),
        CompiledQuery::DateRange {
            field, from, to, ..
        } => {
            let Some(FieldValue::DateMs(ms)) = record.fields.get(field) else {
                return false;
            };
            let within_from = from.as_ref().is_none_or(|f| {
                day_to_ms(f).map(|bound| *ms >= bound).unwrap_or(false)
            });
            let within_to = to
                .as_ref()
                .is_none_or(|t| day_to_ms(t).map(|bound| *ms < bound).unwrap_or(false));
            within_from && within_to
        }
    }
}

fn day_to_ms(day: &str) -> Option<i64> {
    let date = chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    AGENT_TZ
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
}

#[async_trait::async_trait]
impl Skill for QuerySkill {
    fn name(&self) -> &'static str {
        "QuerySkill"
    }

    async fn execute(&self, ctx: &SkillContext) -> SkillResult {
        let query = ctx.query.trim();
        if Self::is_refresh_command(query) {
            return self.refresh_tables().await;
        }

        // Stage 1 — table disambiguation.
        let resolution = match self
            .resolver
            .resolve(query, &ctx.extra, ctx.extra.llm_allowed)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return SkillResult::failure(
                    "QuerySkill",
                    e.to_string(),
                    cf_domain::messages::user_message(e.error_code()),
                    e.error_code(),
                )
            }
        };
        let (table, notice) = match resolution {
            TableResolution::Resolved { table, notice } => (table, notice),
            TableResolution::NeedConfirm { candidates } => {
                let reply = self.resolver.confirmation_reply(&candidates);
                let mut data = SkillData::default();
                data.need_confirm = Some(NeedConfirm {
                    candidates,
                    original_query: query.to_owned(),
                });
                data.query_text = Some(query.to_owned());
                let mut result = SkillResult::ok("QuerySkill", reply);
                result.data = data;
                return result;
            }
        };

        let table_type = self
            .deps
            .tables
            .table_type_of(&table.table_name)
            .unwrap_or("case")
            .to_owned();

        // Stage 2 — compilation. A committed disambiguation reply
        // re-executes the original parked query, not the table name.
        let compile_text = if self
            .resolver
            .resolve_pending_choice(query, &ctx.extra)
            .is_some()
        {
            ctx.extra
                .last_result
                .as_ref()
                .map(|l| l.query.clone())
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| query.to_owned())
        } else {
            query.to_owned()
        };
        let schema = self.deps.schema.get(&table.table_id);
        let today = Utc::now().with_timezone(&AGENT_TZ).date_naive();
        let outcome = self.compiler.compile(
            &compile_text,
            &ctx.extra,
            &table_type,
            schema.as_deref(),
            today,
        );
        tracing::debug!(
            source = outcome.source,
            tool = outcome.query.tool_name(),
            table = %table.table_name,
            "query compiled"
        );

        // Stage 3 — execution with fallback.
        let (page, fallback) = match self.run_query(&table, &outcome.query).await {
            Ok(result) => result,
            Err(e) => {
                return SkillResult::failure(
                    "QuerySkill",
                    e.to_string(),
                    cf_domain::messages::user_message(e.error_code()),
                    e.error_code(),
                )
            }
        };

        // Stage 4 — post-processing.
        if !page.schema.is_empty() {
            self.deps.schema.sync_from_search(&table.table_id, &page.schema);
        }
        let schema = match self
            .deps
            .schema
            .get_or_fetch(self.deps.client.as_ref(), &table.table_id)
            .await
        {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "schema fetch failed; formatting without meta");
                None
            }
        };

        let mut records = page.records;
        for record in &mut records {
            record.table_id = Some(table.table_id.clone());
            record.table_name = Some(table.table_name.clone());
            format_record(record, schema.as_ref());
        }
        let records = self.post_process(&outcome.query, records);

        let total = if page.total > 0 {
            page.total
        } else {
            records.len() as u64
        };
        let mut reply = self.render_reply(&table, &records, total);
        if let Some(notice) = notice {
            reply = format!("{notice}\n{reply}");
        }

        let mut data = SkillData::default();
        data.pagination = Some(PageInfo {
            has_more: page.has_more,
            page_token: page.page_token.clone(),
            total,
            current_page: ctx
                .extra
                .pagination
                .as_ref()
                .map(|c| c.current_page + 1)
                .unwrap_or(1),
        });
        if page.has_more {
            data.pagination_cursor = Some(PaginationCursor {
                tool: outcome.query.tool_name().into(),
                params: serde_json::to_value(&outcome.query).unwrap_or_default(),
                page_token: page.page_token,
                current_page: data.pagination.as_ref().map(|p| p.current_page).unwrap_or(1),
                total,
            });
        }
        data.active_table = Some(table.clone());
        if records.len() == 1 {
            data.active_record = Some(ActiveRecord {
                record_id: records[0].record_id.clone(),
                record: records[0].clone(),
                table_id: table.table_id.clone(),
                table_name: table.table_name.clone(),
                source: "query".into(),
            });
        }
        data.query_text = Some(compile_text);
        data.debug_fallback = fallback;

        // Multi-record lists park a navigation pseudo-action so the
        // in-card pagination and quick-filter buttons stay valid exactly
        // as long as the result they refer to.
        if records.len() > 1 {
            data.pending_action = Some(self.navigation_action(page.has_more));
        }
        data.records = Some(records);

        let mut result = SkillResult::ok("QuerySkill", reply);
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

    fn deps(client: Arc<MockBitableClient>) -> SkillDeps {
        SkillDeps {
            client,
            schema: Arc::new(SchemaCache::new(600, Arc::new(ManualClock::new()))),
            llm: Arc::new(MockLlm::new()),
            tables: Arc::new(TablesConfig::default()),
            skills: Arc::new(SkillsConfig::default()),
            pending_ttl_secs: 300,
        }
    }

    fn case_records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                record_with_fields(
                    &format!("rec{i}"),
                    &[
                        ("案号", &format!("(2024)粤0101民初{}号", 100 + i)),
                        ("案由", "合同纠纷"),
                        ("案件状态", "未结"),
                    ],
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn happy_path_full_scan_formats_and_paginates() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        let mut page = page_of(case_records(5));
        page.total = 5;
        client.script("search", Scripted::Page(page));

        let skill = QuerySkill::new(deps(client), 3, 20);
        let result = skill
            .execute(&SkillContext::new("查所有案件", "u1"))
            .await;

        assert!(result.success);
        assert!(result
            .reply_text
            .starts_with("案件项目总库查询结果（共 5 条）"));
        let data = &result.data;
        assert_eq!(data.records.as_ref().unwrap().len(), 5);
        assert!(data.pagination.is_some());
        assert_eq!(data.active_table.as_ref().unwrap().table_id, "tbl1");
        // Multiple records: no single active record.
        assert!(data.active_record.is_none());
    }

    #[tokio::test]
    async fn single_result_sets_active_record() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        client.script("search_keyword", Scripted::Page(page_of(case_records(1))));

        let skill = QuerySkill::new(deps(client), 3, 20);
        let result = skill
            .execute(&SkillContext::new("查张三丰", "u1"))
            .await;

        assert!(result.success);
        let active = result.data.active_record.as_ref().unwrap();
        assert_eq!(active.record_id, "rec0");
        assert_eq!(active.source, "query");
    }

    #[tokio::test]
    async fn filter_not_supported_falls_back_to_local_scan() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        client.script("search_keyword", Scripted::FilterNotSupported);
        let mut records = case_records(3);
        records[1]
            .fields_text
            .insert("委托人".into(), "张三丰".into());
        client.script("search", Scripted::Page(page_of(records)));

        let skill = QuerySkill::new(deps(client), 3, 20);
        let result = skill
            .execute(&SkillContext::new("查张三丰", "u1"))
            .await;

        assert!(result.success);
        assert_eq!(result.data.debug_fallback.as_deref(), Some("local_scan"));
        assert_eq!(result.data.records.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disambiguation_returns_need_confirm() {
        let client = Arc::new(MockBitableClient::new().with_tables(&[
            ("tbl2", "合同管理表"),
            ("tbl3", "合同归档表"),
        ]));
        let skill = QuerySkill::new(deps(client), 3, 20);
        let result = skill.execute(&SkillContext::new("看看合同", "u1")).await;

        assert!(result.success);
        let need = result.data.need_confirm.as_ref().unwrap();
        assert_eq!(need.candidates.len(), 2);
        assert!(result.reply_text.contains("请回复表名确认"));
    }

    #[tokio::test]
    async fn org_keyword_post_filters_party_fields() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        let mut noisy = record_with_fields(
            "rec_noise",
            &[("案号", "(2024)粤0101民初1号"), ("备注", "提到了万达集团")],
        );
        noisy.fields_text.insert("委托人".into(), "别人".into());
        let mut hit = record_with_fields(
            "rec_hit",
            &[("案号", "(2024)粤0101民初2号")],
        );
        hit.fields_text.insert("委托人".into(), "万达集团".into());
        client.script(
            "search_keyword",
            Scripted::Page(page_of(vec![noisy, hit])),
        );

        let skill = QuerySkill::new(deps(client), 3, 20);
        let result = skill
            .execute(&SkillContext::new("万达集团的案件", "u1"))
            .await;

        let records = result.data.records.as_ref().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, "rec_hit");
    }

    #[tokio::test]
    async fn refresh_command_reloads_tables() {
        let client = Arc::new(
            MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]),
        );
        let skill = QuerySkill::new(deps(client.clone()), 3, 20);
        let result = skill
            .execute(&SkillContext::new("刷新表格缓存", "u1"))
            .await;
        assert!(result.success);
        assert!(result.reply_text.contains("1 张"));
        assert_eq!(client.call_count("list_tables"), 1);
    }
}
