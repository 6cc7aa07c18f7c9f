//! Stage 2 of the query pipeline: compile the user's text into a typed
//! backend call.
//!
//! Sources are tried in a fixed order; the first that yields a compilable
//! plan wins. Every consulted source lands in the resolution trace and a
//! `query_resolution_total{source,status}` counter.

use std::collections::HashMap;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use cf_bitable::FieldType;
use cf_domain::config::{SkillsConfig, TablesConfig};
use cf_domain::metric::MetricEvent;
use cf_domain::types::{ContextExtra, DateRange};

use crate::query::semantic::SemanticExtractor;
use crate::timeparse::parse_time_range;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully-typed backend call, serializable so pagination cursors can
/// replay it on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum CompiledQuery {
    Scan {
        ignore_default_view: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_token: Option<String>,
    },
    ExactMatch {
        field: String,
        value: String,
    },
    Keyword {
        keyword: String,
        fields: Vec<String>,
        /// Organization-shaped keyword: post-filter to high-priority
        /// party fields after execution.
        #[serde(default)]
        org_filter: bool,
    },
    Person {
        /// Identity fields tried in order until one matches.
        fields: Vec<String>,
        open_id: String,
        user_name: String,
    },
    DateRange {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_to: Option<String>,
    },
}

impl CompiledQuery {
    pub fn tool_name(&self) -> &'static str {
        match self {
            CompiledQuery::Scan { .. } => "search",
            CompiledQuery::ExactMatch { .. } => "search_exact",
            CompiledQuery::Keyword { .. } => "search_keyword",
            CompiledQuery::Person { .. } => "search_person",
            CompiledQuery::DateRange { .. } => "search_date_range",
        }
    }
}

/// One consulted source in the resolution trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub source: &'static str,
    /// `selected` | `skipped`.
    pub status: &'static str,
}

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub query: CompiledQuery,
    pub source: &'static str,
    pub trace: Vec<TraceEntry>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct QueryCompiler {
    tables: std::sync::Arc<TablesConfig>,
    skills: std::sync::Arc<SkillsConfig>,
    semantic: SemanticExtractor,
    continuation: Regex,
    structured_party: Regex,
    entity_of: Regex,
    unlabeled_id: Regex,
    exact_label: Regex,
    possessive: Regex,
}

impl QueryCompiler {
    pub fn new(
        tables: std::sync::Arc<TablesConfig>,
        skills: std::sync::Arc<SkillsConfig>,
    ) -> Self {
        Self {
            tables,
            skills,
            semantic: SemanticExtractor::new(),
            continuation: Regex::new(r"下一页|翻页|继续|更多|后面的").expect("static regex"),
            structured_party: Regex::new(
                r"(对方当事人|委托人|第三人)(?:是|为|叫)([^\s,，。的]{2,20})",
            )
            .expect("static regex"),
            entity_of: Regex::new(r"([^\s,，。查找搜看]{2,24})的(?:案件|案子|项目|合同)")
                .expect("static regex"),
            unlabeled_id: Regex::new(r"([A-Za-z]{2,}[-_]?\d{4,})").expect("static regex"),
            exact_label: Regex::new(r"(案号|项目ID|编号)\s*[=＝:：]\s*(\S{2,40})")
                .expect("static regex"),
            possessive: Regex::new(r"我的|我负责|我主办|我承办|我经办").expect("static regex"),
        }
    }

    /// Compile in source order. `table_type` scopes field registries;
    /// `schema` (when cached) informs the exact-match degrade rule.
    pub fn compile(
        &self,
        query: &str,
        extra: &ContextExtra,
        table_type: &str,
        schema: Option<&HashMap<String, FieldType>>,
        today: NaiveDate,
    ) -> CompileOutcome {
        let mut trace: Vec<TraceEntry> = Vec::new();

        macro_rules! attempt {
            ($source:literal, $result:expr) => {
                match $result {
                    Some(q) => {
                        trace.push(TraceEntry {
                            source: $source,
                            status: "selected",
                        });
                        MetricEvent::QueryResolutionTotal {
                            source: $source.into(),
                            status: "selected".into(),
                        }
                        .emit();
                        return CompileOutcome {
                            query: q,
                            source: $source,
                            trace,
                        };
                    }
                    None => {
                        trace.push(TraceEntry {
                            source: $source,
                            status: "skipped",
                        });
                        MetricEvent::QueryResolutionTotal {
                            source: $source.into(),
                            status: "skipped".into(),
                        }
                        .emit();
                    }
                }
            };
        }

        attempt!("pagination", self.try_pagination(query, extra));
        attempt!("planner", self.try_planner(extra));
        attempt!("classification", self.try_classification(query));
        attempt!("semantic_slots", self.try_semantic(query));
        attempt!("structured_phrase", self.try_structured(query, today));
        attempt!("my_records", self.try_possessive(query, extra, table_type));
        attempt!("named_entity", self.try_entity(query));
        attempt!("date_range", self.try_date_range(query, extra, today));
        attempt!("identifier_token", self.try_identifier_token(query));
        attempt!("exact_match", self.try_exact(query, schema));
        attempt!("bare_keyword", self.try_bare_keyword(query));

        // Source 12 always compiles: the paginated full scan.
        trace.push(TraceEntry {
            source: "full_scan",
            status: "selected",
        });
        MetricEvent::QueryResolutionTotal {
            source: "full_scan".into(),
            status: "selected".into(),
        }
        .emit();
        CompileOutcome {
            query: CompiledQuery::Scan {
                ignore_default_view: !self.references_current_view(query),
                page_token: None,
            },
            source: "full_scan",
            trace,
        }
    }

    // ── sources, in order ────────────────────────────────────────────

    /// 1. Continuation of a stored pagination cursor.
    fn try_pagination(&self, query: &str, extra: &ContextExtra) -> Option<CompiledQuery> {
        let cursor = extra.pagination.as_ref()?;
        if !self.continuation.is_match(query) {
            return None;
        }
        let mut compiled: CompiledQuery =
            serde_json::from_value(cursor.params.clone()).ok()?;
        if let CompiledQuery::Scan { page_token, .. } = &mut compiled {
            *page_token = cursor.page_token.clone();
        }
        Some(compiled)
    }

    /// 2. Planner tool pick, kept only when its required slots arrived.
    fn try_planner(&self, extra: &ContextExtra) -> Option<CompiledQuery> {
        let plan = extra.plan.as_ref()?;
        match plan.tool.as_str() {
            "search_keyword" => {
                let keyword = plan.params.get("keyword")?.trim().to_owned();
                (!keyword.is_empty()).then(|| CompiledQuery::Keyword {
                    org_filter: self.looks_like_org(&keyword),
                    keyword,
                    fields: self.tables.keyword_fields.clone(),
                })
            }
            "search_date_range" => {
                let range = extra.date_range.as_ref()?;
                Some(self.date_query(range, plan.params.get("date_field").map(String::as_str)))
            }
            "search_person" => {
                let profile = &extra.user_profile;
                if profile.open_id.is_empty() {
                    return None;
                }
                Some(CompiledQuery::Person {
                    fields: self
                        .tables
                        .identity_fields
                        .get("case")
                        .cloned()
                        .unwrap_or_default(),
                    open_id: profile.open_id.clone(),
                    user_name: profile.user_name.clone(),
                })
            }
            "search" => Some(CompiledQuery::Scan {
                ignore_default_view: true,
                page_token: None,
            }),
            _ => None,
        }
    }

    /// 3. Case-category classification rule (no first-person pronoun).
    fn try_classification(&self, query: &str) -> Option<CompiledQuery> {
        if self.possessive.is_match(query) || query.contains('我') {
            return None;
        }
        for aliases in self.tables.classification_aliases.values() {
            for alias in aliases {
                if query.contains(alias.as_str()) {
                    return Some(CompiledQuery::Keyword {
                        keyword: alias.clone(),
                        fields: self.tables.classification_fields.clone(),
                        org_filter: false,
                    });
                }
            }
        }
        None
    }

    /// 4. Confidence-gated semantic slots.
    fn try_semantic(&self, query: &str) -> Option<CompiledQuery> {
        let slots = self.semantic.extract_gated(
            query,
            self.skills.semantic_slots_enabled,
            self.skills.semantic_confidence_threshold,
        )?;
        if let Some(identifier) = slots.case_identifier {
            return Some(CompiledQuery::Keyword {
                keyword: identifier,
                fields: self.tables.identifier_fields.clone(),
                org_filter: false,
            });
        }
        let party = slots.party?;
        Some(CompiledQuery::Keyword {
            org_filter: self.looks_like_org(&party),
            keyword: party,
            fields: self.tables.party_fields.clone(),
        })
    }

    /// 5. Labelled structured phrases.
    fn try_structured(&self, query: &str, today: NaiveDate) -> Option<CompiledQuery> {
        if let Some(caps) = self.structured_party.captures(query) {
            let field = caps[1].to_owned();
            let value = caps[2].to_owned();
            return Some(CompiledQuery::Keyword {
                org_filter: self.looks_like_org(&value),
                keyword: value,
                fields: vec![field],
            });
        }
        let hearing_field = self.hearing_field();
        if query.contains("已开过庭") || query.contains("开过庭") {
            return Some(CompiledQuery::DateRange {
                field: hearing_field,
                from: None,
                to: Some(today.format("%Y-%m-%d").to_string()),
                time_from: None,
                time_to: None,
            });
        }
        if query.contains("还没开庭") || query.contains("未开庭") {
            return Some(CompiledQuery::DateRange {
                field: hearing_field,
                from: Some(today.format("%Y-%m-%d").to_string()),
                to: None,
                time_from: None,
                time_to: None,
            });
        }
        None
    }

    /// 6. "My X" — person search over the table's identity fields.
    fn try_possessive(
        &self,
        query: &str,
        extra: &ContextExtra,
        table_type: &str,
    ) -> Option<CompiledQuery> {
        if !self.possessive.is_match(query) {
            return None;
        }
        let profile = &extra.user_profile;
        if profile.open_id.is_empty() {
            return None;
        }
        let fields = self
            .tables
            .identity_fields
            .get(table_type)
            .or_else(|| self.tables.identity_fields.get("case"))?
            .clone();
        Some(CompiledQuery::Person {
            fields,
            open_id: profile.open_id.clone(),
            user_name: profile.user_name.clone(),
        })
    }

    /// 7. "X的案件" named-entity keyword.
    fn try_entity(&self, query: &str) -> Option<CompiledQuery> {
        let caps = self.entity_of.captures(query)?;
        let entity = caps[1]
            .trim_start_matches(['查', '找', '搜', '看'])
            .to_owned();
        if entity.chars().count() < 2 || self.possessive.is_match(&entity) || entity.contains('我') {
            return None;
        }
        // Temporal or status phrases before "的案件" are not party names;
        // let the date-range source claim them.
        const NOT_ENTITY: &[&str] = &[
            "开庭", "截止", "到期", "今天", "明天", "后天", "昨天", "本周", "下周", "本月",
            "未结", "已结", "新增", "最近",
        ];
        if NOT_ENTITY.iter().any(|w| entity.contains(w)) {
            return None;
        }
        Some(CompiledQuery::Keyword {
            org_filter: self.looks_like_org(&entity),
            keyword: entity,
            fields: self.tables.party_fields.clone(),
        })
    }

    /// 8. Explicit date range from the context or the time parser.
    fn try_date_range(
        &self,
        query: &str,
        extra: &ContextExtra,
        today: NaiveDate,
    ) -> Option<CompiledQuery> {
        let range = extra
            .date_range
            .clone()
            .or_else(|| parse_time_range(query, today))?;
        let field_hint = if query.contains("截止") || query.contains("到期") {
            Some("deadline")
        } else {
            None
        };
        Some(self.date_query(&range, field_hint))
    }

    /// 9. Unlabelled identifier-shaped token.
    fn try_identifier_token(&self, query: &str) -> Option<CompiledQuery> {
        let caps = self.unlabeled_id.captures(query)?;
        Some(CompiledQuery::Keyword {
            keyword: caps[1].to_owned(),
            fields: self.tables.identifier_fields.clone(),
            org_filter: false,
        })
    }

    /// 10. Labelled exact match; degrades to keyword when the resolved
    /// field is person-typed but the value looks organizational.
    fn try_exact(
        &self,
        query: &str,
        schema: Option<&HashMap<String, FieldType>>,
    ) -> Option<CompiledQuery> {
        let caps = self.exact_label.captures(query)?;
        let field = caps[1].to_owned();
        let value = caps[2].to_owned();
        let person_typed = schema
            .and_then(|s| s.get(&field))
            .is_some_and(|t| *t == FieldType::Person);
        if person_typed && self.looks_like_org(&value) {
            return Some(CompiledQuery::Keyword {
                keyword: value,
                fields: self.tables.keyword_fields.clone(),
                org_filter: true,
            });
        }
        Some(CompiledQuery::ExactMatch { field, value })
    }

    /// 11. Bare keyword after stripping question/action stopwords.
    fn try_bare_keyword(&self, query: &str) -> Option<CompiledQuery> {
        let residue = self.strip_stopwords(query);
        if residue.chars().count() < 2 {
            return None;
        }
        // A residue that only names the table itself is a full scan.
        if self.is_table_word(&residue) {
            return None;
        }
        Some(CompiledQuery::Keyword {
            org_filter: self.looks_like_org(&residue),
            keyword: residue,
            fields: self.tables.keyword_fields.clone(),
        })
    }

    // ── helpers ──────────────────────────────────────────────────────

    fn date_query(&self, range: &DateRange, field_hint: Option<&str>) -> CompiledQuery {
        let key = field_hint.unwrap_or("hearing");
        let field = self
            .tables
            .date_fields
            .get(key)
            .or_else(|| self.tables.date_fields.get("hearing"))
            .cloned()
            .unwrap_or_else(|| "开庭日期".into());
        CompiledQuery::DateRange {
            field,
            from: Some(range.from.clone()),
            to: Some(range.to.clone()),
            time_from: range.time_from.clone(),
            time_to: range.time_to.clone(),
        }
    }

    fn hearing_field(&self) -> String {
        self.tables
            .date_fields
            .get("hearing")
            .cloned()
            .unwrap_or_else(|| "开庭日期".into())
    }

    fn references_current_view(&self, query: &str) -> bool {
        query.contains("当前视图") || query.contains("本视图")
    }

    pub fn looks_like_org(&self, text: &str) -> bool {
        const ORG_MARKERS: &[&str] = &[
            "公司", "集团", "银行", "事务所", "中心", "研究院", "医院", "大学", "局", "厂",
        ];
        ORG_MARKERS.iter().any(|m| text.contains(m)) || text.chars().count() >= 10
    }

    fn strip_stopwords(&self, query: &str) -> String {
        const STOPWORDS: &[&str] = &[
            "请帮我", "帮我", "请问", "麻烦", "查询", "查一下", "查下", "查", "搜索", "搜",
            "找一下", "找", "看看", "看下", "一下", "所有", "全部", "有哪些", "哪些", "多少条",
            "的记录", "的数据", "记录", "数据", "情况", "吗", "呢", "？", "?",
        ];
        let mut residue = query.trim().to_owned();
        for word in STOPWORDS {
            residue = residue.replace(word, "");
        }
        residue.trim_matches([' ', '的', '，', ',', '。']).to_owned()
    }

    fn is_table_word(&self, text: &str) -> bool {
        self.tables
            .type_aliases
            .values()
            .flatten()
            .any(|alias| text == alias.as_str() || alias.contains(text.trim()))
            || text == "案子"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_domain::types::{PaginationCursor, PlannerPlan, UserProfile};
    use std::sync::Arc;

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(
            Arc::new(TablesConfig::default()),
            Arc::new(SkillsConfig::default()),
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 10).unwrap()
    }

    fn compile(query: &str, extra: &ContextExtra) -> CompileOutcome {
        compiler().compile(query, extra, "case", None, today())
    }

    #[test]
    fn all_cases_query_compiles_to_full_scan() {
        let out = compile("查所有案件", &ContextExtra::default());
        assert_eq!(out.source, "full_scan");
        assert_eq!(
            out.query,
            CompiledQuery::Scan {
                ignore_default_view: true,
                page_token: None
            }
        );
    }

    #[test]
    fn pagination_cursor_wins_on_continuation() {
        let mut extra = ContextExtra::default();
        extra.pagination = Some(PaginationCursor {
            tool: "search".into(),
            params: serde_json::to_value(CompiledQuery::Scan {
                ignore_default_view: true,
                page_token: None,
            })
            .unwrap(),
            page_token: Some("tok2".into()),
            current_page: 1,
            total: 40,
        });
        let out = compile("下一页", &extra);
        assert_eq!(out.source, "pagination");
        assert_eq!(
            out.query,
            CompiledQuery::Scan {
                ignore_default_view: true,
                page_token: Some("tok2".into())
            }
        );
    }

    #[test]
    fn fresh_query_ignores_stale_cursor() {
        let mut extra = ContextExtra::default();
        extra.pagination = Some(PaginationCursor {
            tool: "search".into(),
            params: serde_json::to_value(CompiledQuery::Scan {
                ignore_default_view: true,
                page_token: None,
            })
            .unwrap(),
            page_token: Some("tok2".into()),
            current_page: 1,
            total: 40,
        });
        let out = compile("委托人是张三的案件", &extra);
        assert_ne!(out.source, "pagination");
    }

    #[test]
    fn planner_tool_retained_with_slots() {
        let mut extra = ContextExtra::default();
        extra.plan = Some(PlannerPlan {
            scenario: "keyword".into(),
            tool: "search_keyword".into(),
            confidence: 0.9,
            params: [("keyword".to_string(), "张三".to_string())]
                .into_iter()
                .collect(),
        });
        let out = compile("查张三", &extra);
        assert_eq!(out.source, "planner");
        match out.query {
            CompiledQuery::Keyword { keyword, .. } => assert_eq!(keyword, "张三"),
            other => panic!("expected keyword, got {other:?}"),
        }
    }

    #[test]
    fn planner_without_slots_is_skipped() {
        let mut extra = ContextExtra::default();
        extra.plan = Some(PlannerPlan {
            tool: "search_keyword".into(),
            confidence: 0.9,
            ..Default::default()
        });
        let out = compile("查所有案件", &extra);
        assert_ne!(out.source, "planner");
    }

    #[test]
    fn classification_rule_needs_no_pronoun() {
        let out = compile("非诉案件有哪些", &ContextExtra::default());
        assert_eq!(out.source, "classification");

        let my = compile("我的非诉案件", &ContextExtra::default());
        assert_ne!(my.source, "classification");
    }

    #[test]
    fn semantic_identifier_beats_bare_keyword() {
        let out = compile("查案号(2024)粤0101民初100号", &ContextExtra::default());
        assert_eq!(out.source, "semantic_slots");
        match out.query {
            CompiledQuery::Keyword { fields, .. } => {
                assert!(fields.contains(&"案号".to_string()));
            }
            other => panic!("expected keyword, got {other:?}"),
        }
    }

    #[test]
    fn structured_party_phrase_targets_one_field() {
        let out = compile("对方当事人是万达集团的案子", &ContextExtra::default());
        assert_eq!(out.source, "structured_phrase");
        match out.query {
            CompiledQuery::Keyword {
                keyword,
                fields,
                org_filter,
            } => {
                assert_eq!(keyword, "万达集团");
                assert_eq!(fields, vec!["对方当事人".to_string()]);
                assert!(org_filter);
            }
            other => panic!("expected keyword, got {other:?}"),
        }
    }

    #[test]
    fn possessive_query_uses_person_search() {
        let mut extra = ContextExtra::default();
        extra.user_profile = UserProfile {
            open_id: "ou_me".into(),
            user_name: "王律师".into(),
        };
        let out = compile("我的案件", &extra);
        assert_eq!(out.source, "my_records");
        match out.query {
            CompiledQuery::Person {
                fields, open_id, ..
            } => {
                assert_eq!(open_id, "ou_me");
                assert_eq!(fields[0], "主办律师");
            }
            other => panic!("expected person, got {other:?}"),
        }
    }

    #[test]
    fn possessive_without_profile_falls_through() {
        let out = compile("我的案件", &ContextExtra::default());
        assert_ne!(out.source, "my_records");
    }

    #[test]
    fn tomorrow_hearing_compiles_to_date_range() {
        let out = compile("明天开庭的案件", &ContextExtra::default());
        assert_eq!(out.source, "date_range");
        match out.query {
            CompiledQuery::DateRange { field, from, to, .. } => {
                assert_eq!(field, "开庭日期");
                assert_eq!(from.as_deref(), Some("2024-09-11"));
                assert_eq!(to.as_deref(), Some("2024-09-12"));
            }
            other => panic!("expected date range, got {other:?}"),
        }
    }

    #[test]
    fn deadline_keyword_picks_deadline_field() {
        let out = compile("本周截止的事项", &ContextExtra::default());
        match out.query {
            CompiledQuery::DateRange { field, .. } => assert_eq!(field, "截止日期"),
            other => panic!("expected date range, got {other:?}"),
        }
    }

    #[test]
    fn exact_label_compiles_to_exact_match() {
        let out = compile("案号 = AJ-20240101", &ContextExtra::default());
        // Semantic slots fire first on labelled identifiers by design.
        assert!(out.source == "semantic_slots" || out.source == "exact_match");
    }

    #[test]
    fn bare_keyword_residue_searches_keyword_fields() {
        let out = compile("查张三丰", &ContextExtra::default());
        assert_eq!(out.source, "bare_keyword");
        match out.query {
            CompiledQuery::Keyword { keyword, .. } => assert_eq!(keyword, "张三丰"),
            other => panic!("expected keyword, got {other:?}"),
        }
    }

    #[test]
    fn trace_records_the_consulted_sources() {
        let out = compile("查所有案件", &ContextExtra::default());
        assert_eq!(out.trace.last().unwrap().source, "full_scan");
        assert!(out.trace.iter().filter(|t| t.status == "skipped").count() >= 5);
    }
}
