use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM facade configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_20000")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_1")]
    pub max_retries: u32,
    /// Registered providers; the first is the default, the rest are
    /// reachable by role override.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Role → provider/model, e.g. `planner = "main/gpt-4o-mini"`.
    #[serde(default)]
    pub roles: HashMap<String, String>,
    /// Per-model pricing for cost estimation (key = model name).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 20_000,
            max_retries: 1,
            providers: Vec::new(),
            roles: HashMap::new(),
            pricing: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable identifier referenced from `roles`.
    pub id: String,
    /// OpenAI-compatible chat-completions base URL.
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    pub model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

fn d_20000() -> u64 {
    20_000
}
fn d_1() -> u32 {
    1
}
fn d_api_key_env() -> String {
    "CF_LLM_API_KEY".into()
}
fn d_temperature() -> f32 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_estimates_scale_per_million() {
        let p = ModelPricing {
            input_per_1m: 2.0,
            output_per_1m: 8.0,
        };
        let cost = p.estimate_cost(500_000, 250_000);
        assert!((cost - 3.0).abs() < 1e-9);
    }
}
