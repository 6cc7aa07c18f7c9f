use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cost & rate guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Per-skill hourly cost ceiling in USD. Missing skills use `default_hourly_usd`.
    #[serde(default)]
    pub hourly_usd: HashMap<String, f64>,
    #[serde(default)]
    pub daily_usd: HashMap<String, f64>,
    #[serde(default = "d_hourly")]
    pub default_hourly_usd: f64,
    #[serde(default = "d_daily")]
    pub default_daily_usd: f64,
    /// When set, one crossed threshold disables all LLM calls for the rest
    /// of that window.
    #[serde(default)]
    pub circuit_breaker: bool,
    /// Guidance shown instead of the LLM reply when a call is blocked.
    #[serde(default = "d_guidance")]
    pub blocked_guidance: String,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hourly_usd: HashMap::new(),
            daily_usd: HashMap::new(),
            default_hourly_usd: d_hourly(),
            default_daily_usd: d_daily(),
            circuit_breaker: false,
            blocked_guidance: d_guidance(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_hourly() -> f64 {
    1.0
}
fn d_daily() -> f64 {
    8.0
}
fn d_guidance() -> String {
    "当前咨询量较大，智能解析暂时受限。您仍然可以使用「查案件」「新增案件」等明确指令。".into()
}
