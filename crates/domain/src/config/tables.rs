use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-table domain knowledge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Table-level configuration: aliases, field registries, write defaults,
/// and the close/delete profile bundles. Ships with built-in values for
/// the legal-practice base; every section can be overridden from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    /// Table-type → name aliases used for table disambiguation
    /// (`case` → ["案件"], …).
    #[serde(default = "d_type_aliases")]
    pub type_aliases: HashMap<String, Vec<String>>,
    /// Alias → concrete table name, consulted before any LLM call.
    #[serde(default)]
    pub table_aliases: HashMap<String, String>,
    /// Default table name per type, used by domain hints ("案件" queries
    /// with no explicit table).
    #[serde(default = "d_default_tables")]
    pub default_tables: HashMap<String, String>,
    /// Table types that reject writes entirely.
    #[serde(default = "d_read_only")]
    pub read_only_table_types: Vec<String>,
    /// Person-typed identity fields per table type, in fallback order,
    /// used for "my X" queries.
    #[serde(default = "d_identity_fields")]
    pub identity_fields: HashMap<String, Vec<String>>,
    /// Fields searched by bare-keyword queries.
    #[serde(default = "d_keyword_fields")]
    pub keyword_fields: Vec<String>,
    /// Fields holding case identifiers (案号 / 项目ID).
    #[serde(default = "d_identifier_fields")]
    pub identifier_fields: Vec<String>,
    /// Party fields, ordered by priority; the head entries are the
    /// "high-priority" set used for organization post-filtering.
    #[serde(default = "d_party_fields")]
    pub party_fields: Vec<String>,
    #[serde(default = "d_high_priority_party")]
    pub high_priority_party_fields: Vec<String>,
    /// Fields weighted ×3 by the relevance reorder.
    #[serde(default = "d_title_fields")]
    pub title_fields: Vec<String>,
    /// Case-category aliases for the classification rule
    /// (`non_litigation` → ["非诉", …]).
    #[serde(default = "d_classification_aliases")]
    pub classification_aliases: HashMap<String, Vec<String>>,
    /// Fields searched by the classification rule.
    #[serde(default = "d_classification_fields")]
    pub classification_fields: Vec<String>,
    /// Date-field guesses by query keyword: `hearing` / `deadline`.
    #[serde(default = "d_date_fields")]
    pub date_fields: HashMap<String, String>,
    /// Write defaults applied on create, per table type.
    #[serde(default = "d_create_defaults")]
    pub create_defaults: HashMap<String, HashMap<String, String>>,
    /// Duplicate-detection field per table type.
    #[serde(default = "d_dedupe_fields")]
    pub dedupe_fields: HashMap<String, String>,
    /// Append-mode fields per table type.
    #[serde(default = "d_append_fields")]
    pub append_fields: HashMap<String, Vec<AppendFieldRule>>,
    /// Close profiles per table type, keyed by semantic.
    #[serde(default = "d_close_profiles")]
    pub close_profiles: HashMap<String, HashMap<String, CloseProfile>>,
    /// Delete profiles; `default` is always present.
    #[serde(default = "d_delete_profiles")]
    pub delete_profiles: HashMap<String, DeleteProfile>,
    /// Close-intent keyword lists per table type: semantic → phrases.
    /// Phrases not listed resolve to `default`.
    #[serde(default = "d_close_intents")]
    pub close_intent_mapping: HashMap<String, HashMap<String, Vec<String>>>,
}

/// An append-mode field rule: new values are concatenated (with a date
/// prefix) instead of replacing the old value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendFieldRule {
    pub field: String,
    #[serde(default = "d_true")]
    pub date_prefix: bool,
}

/// Parameters of a "close record" mutation for one semantic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseProfile {
    pub title: String,
    pub status_field: String,
    pub target_status: String,
    pub confirm_text: String,
    pub cancel_text: String,
    #[serde(default)]
    pub consequences: Vec<String>,
    #[serde(default = "d_true")]
    pub remove_from_open_list: bool,
    #[serde(default = "d_close_all")]
    pub reminder_policy: String,
}

/// Parameters of a delete confirmation card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteProfile {
    pub title: String,
    pub subtitle: String,
    pub confirm_text: String,
    pub cancel_text: String,
    #[serde(default = "d_danger")]
    pub confirm_type: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggestion: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            type_aliases: d_type_aliases(),
            table_aliases: HashMap::new(),
            default_tables: d_default_tables(),
            read_only_table_types: d_read_only(),
            identity_fields: d_identity_fields(),
            keyword_fields: d_keyword_fields(),
            identifier_fields: d_identifier_fields(),
            party_fields: d_party_fields(),
            high_priority_party_fields: d_high_priority_party(),
            title_fields: d_title_fields(),
            classification_aliases: d_classification_aliases(),
            classification_fields: d_classification_fields(),
            date_fields: d_date_fields(),
            create_defaults: d_create_defaults(),
            dedupe_fields: d_dedupe_fields(),
            append_fields: d_append_fields(),
            close_profiles: d_close_profiles(),
            delete_profiles: d_delete_profiles(),
            close_intent_mapping: d_close_intents(),
        }
    }
}

impl TablesConfig {
    /// Resolve a table name to its configured type (`case`, `contracts`, …).
    pub fn table_type_of(&self, table_name: &str) -> Option<&str> {
        for (table_type, aliases) in &self.type_aliases {
            if aliases.iter().any(|a| table_name.contains(a.as_str())) {
                return Some(table_type.as_str());
            }
        }
        None
    }

    pub fn is_read_only(&self, table_type: &str) -> bool {
        self.read_only_table_types
            .iter()
            .any(|t| t == table_type)
    }

    /// Match the original utterance against the close-intent keyword
    /// lists. Unknown phrasing resolves to `default` — no guessing.
    pub fn close_semantic_for(&self, table_type: &str, utterance: &str) -> String {
        if let Some(mapping) = self.close_intent_mapping.get(table_type) {
            // Non-default semantics win over `default` keyword hits.
            for (semantic, phrases) in mapping {
                if semantic == "default" {
                    continue;
                }
                if phrases.iter().any(|p| utterance.contains(p.as_str())) {
                    return semantic.clone();
                }
            }
        }
        "default".into()
    }

    pub fn close_profile(&self, table_type: &str, semantic: &str) -> Option<&CloseProfile> {
        let profiles = self.close_profiles.get(table_type)?;
        profiles
            .get(semantic)
            .or_else(|| profiles.get("default"))
    }

    pub fn delete_profile(&self, table_type: &str) -> &DeleteProfile {
        self.delete_profiles
            .get(table_type)
            .or_else(|| self.delete_profiles.get("default"))
            .expect("delete_profiles always carries a default")
    }
}

// ── built-in defaults ───────────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_danger() -> String {
    "danger".into()
}
fn d_close_all() -> String {
    "close_all".into()
}

fn d_type_aliases() -> HashMap<String, Vec<String>> {
    HashMap::from([
        ("case".into(), vec!["案件".into()]),
        ("contracts".into(), vec!["合同".into()]),
        (
            "bidding".into(),
            vec!["招投标".into(), "投标".into(), "台账".into()],
        ),
        (
            "team_overview".into(),
            vec![
                "团队成员工作总览".into(),
                "团队工作总览".into(),
                "团队成员".into(),
            ],
        ),
    ])
}

fn d_default_tables() -> HashMap<String, String> {
    HashMap::from([("case".into(), "案件项目总库".into())])
}

fn d_read_only() -> Vec<String> {
    vec!["team_overview".into()]
}

fn d_identity_fields() -> HashMap<String, Vec<String>> {
    HashMap::from([
        (
            "case".into(),
            vec!["主办律师".into(), "协办律师".into(), "承办人".into()],
        ),
        ("contracts".into(), vec!["负责人".into()]),
        ("bidding".into(), vec!["负责人".into()]),
    ])
}

fn d_keyword_fields() -> Vec<String> {
    vec![
        "案号".into(),
        "案由".into(),
        "委托人".into(),
        "对方当事人".into(),
        "备注".into(),
    ]
}

fn d_identifier_fields() -> Vec<String> {
    vec!["案号".into(), "项目ID".into(), "编号".into()]
}

fn d_party_fields() -> Vec<String> {
    vec![
        "委托人".into(),
        "对方当事人".into(),
        "第三人".into(),
        "备注".into(),
    ]
}

fn d_high_priority_party() -> Vec<String> {
    vec!["委托人".into(), "对方当事人".into()]
}

fn d_title_fields() -> Vec<String> {
    vec!["案号".into(), "案由".into(), "项目名称".into()]
}

fn d_classification_aliases() -> HashMap<String, Vec<String>> {
    HashMap::from([
        (
            "non_litigation".into(),
            vec!["非诉".into(), "非诉讼".into()],
        ),
        ("litigation".into(), vec!["诉讼".into()]),
        ("arbitration".into(), vec!["仲裁".into()]),
        (
            "enforcement".into(),
            vec!["执行".into(), "强制执行".into()],
        ),
    ])
}

fn d_classification_fields() -> Vec<String> {
    vec!["案件分类".into(), "业务类型".into()]
}

fn d_date_fields() -> HashMap<String, String> {
    HashMap::from([
        ("hearing".into(), "开庭日期".into()),
        ("deadline".into(), "截止日期".into()),
    ])
}

fn d_create_defaults() -> HashMap<String, HashMap<String, String>> {
    HashMap::from([
        (
            "case".into(),
            HashMap::from([("案件状态".into(), "未结".into())]),
        ),
        (
            "bidding".into(),
            HashMap::from([("标书领取状态".into(), "未领取".into())]),
        ),
    ])
}

fn d_dedupe_fields() -> HashMap<String, String> {
    HashMap::from([
        ("case".into(), "案号".into()),
        ("contracts".into(), "合同编号".into()),
        ("bidding".into(), "项目编号".into()),
    ])
}

fn d_append_fields() -> HashMap<String, Vec<AppendFieldRule>> {
    HashMap::from([(
        "case".into(),
        vec![AppendFieldRule {
            field: "进展".into(),
            date_prefix: true,
        }],
    )])
}

fn d_close_profiles() -> HashMap<String, HashMap<String, CloseProfile>> {
    HashMap::from([
        (
            "case".into(),
            HashMap::from([
                (
                    "default".into(),
                    CloseProfile {
                        title: "案件结案".into(),
                        status_field: "案件状态".into(),
                        target_status: "已结案".into(),
                        confirm_text: "确认结案".into(),
                        cancel_text: "暂不结案".into(),
                        consequences: vec![
                            "案件将从在办视角移出".into(),
                            "后续更新需通过结案后流程处理".into(),
                        ],
                        remove_from_open_list: true,
                        reminder_policy: "close_all".into(),
                    },
                ),
                (
                    "enforcement_end".into(),
                    CloseProfile {
                        title: "执行终本".into(),
                        status_field: "案件状态".into(),
                        target_status: "执行终本".into(),
                        confirm_text: "确认终本".into(),
                        cancel_text: "暂不终本".into(),
                        consequences: vec![
                            "后续可恢复执行".into(),
                            "数据保留在未结列表或终本分类".into(),
                        ],
                        remove_from_open_list: false,
                        reminder_policy: "preserve_seizure".into(),
                    },
                ),
            ]),
        ),
        (
            "contracts".into(),
            HashMap::from([(
                "default".into(),
                CloseProfile {
                    title: "合同归档".into(),
                    status_field: "合同状态".into(),
                    target_status: "已归档".into(),
                    confirm_text: "确认归档".into(),
                    cancel_text: "暂不归档".into(),
                    consequences: vec![
                        "合同将进入归档状态".into(),
                        "归档后默认不再进入日常跟进列表".into(),
                    ],
                    remove_from_open_list: true,
                    reminder_policy: "close_all".into(),
                },
            )]),
        ),
        (
            "bidding".into(),
            HashMap::from([(
                "default".into(),
                CloseProfile {
                    title: "投标关闭".into(),
                    status_field: "状态".into(),
                    target_status: "已关闭".into(),
                    confirm_text: "确认关闭".into(),
                    cancel_text: "暂不关闭".into(),
                    consequences: vec![
                        "项目将标记为关闭".into(),
                        "关闭后默认不在进行中列表展示".into(),
                    ],
                    remove_from_open_list: true,
                    reminder_policy: "close_all".into(),
                },
            )]),
        ),
    ])
}

fn d_delete_profiles() -> HashMap<String, DeleteProfile> {
    HashMap::from([(
        "default".into(),
        DeleteProfile {
            title: "删除确认".into(),
            subtitle: "该操作不可撤销，请再次确认。".into(),
            confirm_text: "确认删除".into(),
            cancel_text: "取消".into(),
            confirm_type: "danger".into(),
            warnings: vec!["该操作将永久删除记录".into()],
            suggestion: "如仅需结束流程，建议优先使用关闭/结案。".into(),
        },
    )])
}

fn d_close_intents() -> HashMap<String, HashMap<String, Vec<String>>> {
    HashMap::from([(
        "case".into(),
        HashMap::from([
            (
                "default".into(),
                vec![
                    "结案".into(),
                    "判决生效".into(),
                    "撤诉".into(),
                    "调解结案".into(),
                ],
            ),
            (
                "enforcement_end".into(),
                vec![
                    "执行终本".into(),
                    "执行不了了".into(),
                    "终本".into(),
                    "终结本次执行".into(),
                ],
            ),
        ]),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_type_resolves_by_alias() {
        let cfg = TablesConfig::default();
        assert_eq!(cfg.table_type_of("案件项目总库"), Some("case"));
        assert_eq!(cfg.table_type_of("合同管理表"), Some("contracts"));
        assert_eq!(cfg.table_type_of("文档库"), None);
    }

    #[test]
    fn close_semantic_matches_configured_phrases_only() {
        let cfg = TablesConfig::default();
        assert_eq!(cfg.close_semantic_for("case", "这个案子执行终本了"), "enforcement_end");
        assert_eq!(cfg.close_semantic_for("case", "帮我结案"), "default");
        // Phrases outside the configured lists never guess a semantic.
        assert_eq!(cfg.close_semantic_for("case", "案子不想做了"), "default");
    }

    #[test]
    fn close_profile_falls_back_to_default() {
        let cfg = TablesConfig::default();
        let p = cfg.close_profile("contracts", "enforcement_end").unwrap();
        assert_eq!(p.target_status, "已归档");
    }

    #[test]
    fn read_only_tables_are_flagged() {
        let cfg = TablesConfig::default();
        assert!(cfg.is_read_only("team_overview"));
        assert!(!cfg.is_read_only("case"));
    }

    #[test]
    fn delete_profile_always_available() {
        let cfg = TablesConfig::default();
        let p = cfg.delete_profile("case");
        assert_eq!(p.confirm_type, "danger");
    }
}
