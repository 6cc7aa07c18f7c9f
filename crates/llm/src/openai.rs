//! OpenAI-compatible chat-completions implementation of [`LlmFacade`].
//!
//! One non-streaming POST per operation, JSON mode requested, fenced
//! output tolerated. Transient transport failures are retried once.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use cf_domain::config::{LlmConfig, ProviderConfig};
use cf_domain::{Error, Result};

use crate::facade::{IntentGuess, LlmFacade, LlmResponse, Usage};

pub struct OpenAiCompatLlm {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
}

impl OpenAiCompatLlm {
    pub fn new(cfg: &LlmConfig, provider: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.default_timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let api_key = std::env::var(&provider.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                provider = %provider.id,
                env = %provider.api_key_env,
                "no API key configured"
            );
        }
        Ok(Self {
            http,
            base_url: provider.base_url.trim_end_matches('/').to_owned(),
            api_key,
            model: provider.model.clone(),
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
            max_retries: cfg.max_retries,
        })
    }

    async fn complete(&self, system: &str, user: &str) -> Result<(String, Usage)> {
        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
            let mut rb = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .json(&payload);
            if let Some(key) = &self.api_key {
                rb = rb.bearer_auth(key);
            }
            match rb.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp
                        .json()
                        .await
                        .map_err(|e| Error::Llm {
                            provider: self.model.clone(),
                            message: e.to_string(),
                        })?;
                    let content = body
                        .pointer("/choices/0/message/content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                    let usage = Usage {
                        prompt_tokens: body
                            .pointer("/usage/prompt_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                        completion_tokens: body
                            .pointer("/usage/completion_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                        total_tokens: body
                            .pointer("/usage/total_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                    };
                    return Ok((content, usage));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    // 4xx is permanent; only retry server-side failures.
                    if status.is_client_error() {
                        return Err(Error::Llm {
                            provider: self.model.clone(),
                            message: format!("{status}: {text}"),
                        });
                    }
                    last_err = Some(Error::Llm {
                        provider: self.model.clone(),
                        message: format!("{status}: {text}"),
                    });
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(Error::Timeout(format!("llm call: {e}")));
                }
                Err(e) => {
                    last_err = Some(Error::Connection(format!("llm call: {e}")));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Llm {
            provider: self.model.clone(),
            message: "exhausted retries".into(),
        }))
    }
}

/// Parse a model reply into JSON, tolerating ``` fences and leading prose.
pub fn parse_json_reply(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }
    // Strip a fenced block if present.
    if let Some(start) = trimmed.find("```") {
        let inner = &trimmed[start + 3..];
        let inner = inner.strip_prefix("json").unwrap_or(inner);
        if let Some(end) = inner.find("```") {
            if let Ok(v) = serde_json::from_str(inner[..end].trim()) {
                return Ok(v);
            }
        }
    }
    // Last resort: the outermost brace span.
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(v) = serde_json::from_str(&trimmed[open..=close]) {
                return Ok(v);
            }
        }
    }
    let preview: String = trimmed.chars().take(80).collect();
    Err(Error::Llm {
        provider: "parse".into(),
        message: format!("unparseable JSON reply: {preview}"),
    })
}

const INTENT_SYSTEM: &str = "你是法律实务助理的意图分类器。根据用户消息判断目标技能，\
输出 JSON：{\"skill\": \"QuerySkill|CreateSkill|UpdateSkill|DeleteSkill|ChitchatSkill\", \
\"confidence\": 0-1, \"scenario\": \"...\", \"tool\": \"...\", \"params\": {}}。\
查询类消息选 QuerySkill；新增/录入选 CreateSkill；更新/修改/结案选 UpdateSkill；\
删除选 DeleteSkill；寒暄选 ChitchatSkill。";

const SLOTS_SYSTEM: &str = "你是结构化信息抽取器。从用户消息里抽取给定字段的值，\
输出 JSON 对象，键为字段名，值为字符串；没有提到的字段不要输出。日期统一为 YYYY-MM-DD。";

#[async_trait::async_trait]
impl LlmFacade for OpenAiCompatLlm {
    async fn chat_json(&self, prompt: &str) -> Result<LlmResponse<Value>> {
        let (content, usage) = self
            .complete("仅输出一个 JSON 对象，不要输出其他内容。", prompt)
            .await?;
        Ok(LlmResponse {
            value: parse_json_reply(&content)?,
            usage,
            model: self.model.clone(),
        })
    }

    async fn classify_intent(&self, query: &str, context: &str) -> Result<LlmResponse<IntentGuess>> {
        let user = if context.is_empty() {
            query.to_owned()
        } else {
            format!("上下文：{context}\n用户消息:{query}")
        };
        let (content, usage) = self.complete(INTENT_SYSTEM, &user).await?;
        let value = parse_json_reply(&content)?;
        let guess: IntentGuess = serde_json::from_value(value).unwrap_or_default();
        Ok(LlmResponse {
            value: guess,
            usage,
            model: self.model.clone(),
        })
    }

    async fn extract_slots(
        &self,
        query: &str,
        schema_fields: &[String],
    ) -> Result<LlmResponse<BTreeMap<String, String>>> {
        let user = format!("字段：{}\n用户消息：{}", schema_fields.join("、"), query);
        let (content, usage) = self.complete(SLOTS_SYSTEM, &user).await?;
        let value = parse_json_reply(&content)?;
        let slots = value
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s.clone(),
                            Value::Number(n) => n.to_string(),
                            _ => return None,
                        };
                        (!text.trim().is_empty()).then(|| (k.clone(), text))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(LlmResponse {
            value: slots,
            usage,
            model: self.model.clone(),
        })
    }
}
