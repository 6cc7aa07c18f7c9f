use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skill routing / intent resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Assistant persona name used in replies and card headers.
    #[serde(default = "d_assistant_name")]
    pub assistant_name: String,
    /// Planner confidence at or above which its skill pick is accepted.
    #[serde(default = "d_planner_threshold")]
    pub planner_confidence_threshold: f64,
    /// Table disambiguation bands: accept ≥ high, accept-with-notice ≥
    /// low, confirm below.
    #[serde(default = "d_085")]
    pub table_confidence_high: f64,
    #[serde(default = "d_065")]
    pub table_confidence_low: f64,
    /// Semantic slot extraction gate.
    #[serde(default = "d_true")]
    pub semantic_slots_enabled: bool,
    #[serde(default = "d_06")]
    pub semantic_confidence_threshold: f64,
    /// Per-skill execution timeout.
    #[serde(default = "d_25000")]
    pub skill_timeout_ms: u64,
    /// Declarative pre-LLM rules, evaluated in order.
    #[serde(default = "d_l0_rules")]
    pub l0_rules: Vec<L0Rule>,
    /// Chitchat response pool file (YAML list). Missing file → built-ins.
    #[serde(default = "d_casual_pool")]
    pub casual_responses_path: String,
    /// Allow the chitchat skill to call the LLM for replies outside the
    /// response pool.
    #[serde(default)]
    pub chitchat_allow_llm: bool,
}

/// One L0 rule: a regex over the query plus an outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L0Rule {
    pub pattern: String,
    pub outcome: L0Outcome,
    /// Reply text (for `reply`) or skill name (for `force_skill`).
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L0Outcome {
    /// Return `value` verbatim and stop the pipeline.
    Reply,
    /// Route to the skill named in `value`, skipping the planner.
    ForceSkill,
    /// Hint the resolver that this is small talk.
    ChitchatHint,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            assistant_name: d_assistant_name(),
            planner_confidence_threshold: d_planner_threshold(),
            table_confidence_high: 0.85,
            table_confidence_low: 0.65,
            semantic_slots_enabled: true,
            semantic_confidence_threshold: 0.6,
            skill_timeout_ms: 25_000,
            l0_rules: d_l0_rules(),
            casual_responses_path: d_casual_pool(),
            chitchat_allow_llm: false,
        }
    }
}

fn d_assistant_name() -> String {
    "小敬".into()
}
fn d_planner_threshold() -> f64 {
    0.7
}
fn d_085() -> f64 {
    0.85
}
fn d_065() -> f64 {
    0.65
}
fn d_06() -> f64 {
    0.6
}
fn d_true() -> bool {
    true
}
fn d_25000() -> u64 {
    25_000
}
fn d_casual_pool() -> String {
    "config/responses/casual.yaml".into()
}

fn d_l0_rules() -> Vec<L0Rule> {
    vec![
        L0Rule {
            pattern: r"^(你好|您好|hi|hello|早上好|下午好|晚上好)[!！。~～]*$".into(),
            outcome: L0Outcome::ChitchatHint,
            value: String::new(),
        },
        L0Rule {
            pattern: r"^(谢谢|多谢|辛苦了)[!！。~～]*$".into(),
            outcome: L0Outcome::Reply,
            value: "不客气，随时找我。".into(),
        },
        L0Rule {
            pattern: r"^(查|查询|搜|搜索|找)".into(),
            outcome: L0Outcome::ForceSkill,
            value: "QuerySkill".into(),
        },
        L0Rule {
            pattern: r"^(新增|新建|创建|录入)".into(),
            outcome: L0Outcome::ForceSkill,
            value: "CreateSkill".into(),
        },
        L0Rule {
            pattern: r"^(删除|删掉)".into(),
            outcome: L0Outcome::ForceSkill,
            value: "DeleteSkill".into(),
        },
    ]
}
