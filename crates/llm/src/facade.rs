//! The facade trait and its I/O types.
//!
//! Prompts are an implementation detail of each operation; callers only
//! see typed inputs and outputs plus usage metadata for cost accounting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cf_domain::Result;

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A typed facade reply plus the usage that produced it.
#[derive(Debug, Clone)]
pub struct LlmResponse<T> {
    pub value: T,
    pub usage: Usage,
    pub model: String,
}

/// Intent classification output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentGuess {
    /// Target skill name (e.g. `QuerySkill`).
    #[serde(default)]
    pub skill: String,
    #[serde(default)]
    pub confidence: f64,
    /// Planner scenario label, when the classifier works scenario-first.
    #[serde(default)]
    pub scenario: String,
    /// Backend tool suggested by the planner (`search_keyword`, …).
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Table-disambiguation output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablePick {
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub candidates: Vec<String>,
}

/// Facade with no provider behind it. Every call fails cleanly so the
/// rule-driven fallbacks take over; used when no provider is configured.
pub struct NullLlm;

#[async_trait::async_trait]
impl LlmFacade for NullLlm {
    async fn chat_json(&self, _prompt: &str) -> Result<LlmResponse<Value>> {
        Err(no_provider())
    }

    async fn classify_intent(
        &self,
        _query: &str,
        _context: &str,
    ) -> Result<LlmResponse<IntentGuess>> {
        Err(no_provider())
    }

    async fn extract_slots(
        &self,
        _query: &str,
        _schema_fields: &[String],
    ) -> Result<LlmResponse<BTreeMap<String, String>>> {
        Err(no_provider())
    }
}

fn no_provider() -> cf_domain::Error {
    cf_domain::Error::Llm {
        provider: "none".into(),
        message: "no LLM provider configured".into(),
    }
}

/// The three operations every LLM backend must provide.
#[async_trait::async_trait]
pub trait LlmFacade: Send + Sync {
    /// Free-form JSON completion: send a prompt, get one JSON object back.
    async fn chat_json(&self, prompt: &str) -> Result<LlmResponse<Value>>;

    /// Classify the user query into an intent with parameters.
    /// `context` carries conversation hints (active table, last skill).
    async fn classify_intent(&self, query: &str, context: &str) -> Result<LlmResponse<IntentGuess>>;

    /// Extract field values from an utterance against a known schema.
    /// Keys are field names; values are raw strings pending coercion.
    async fn extract_slots(
        &self,
        query: &str,
        schema_fields: &[String],
    ) -> Result<LlmResponse<BTreeMap<String, String>>>;
}
