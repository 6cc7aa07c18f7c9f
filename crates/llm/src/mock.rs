//! Scriptable [`LlmFacade`] for tests. Responses are queued per
//! operation; an empty queue yields a zero-confidence default so rule
//! fallbacks can be exercised.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use serde_json::Value;

use cf_domain::{Error, Result};

use crate::facade::{IntentGuess, LlmFacade, LlmResponse, Usage};

#[derive(Default)]
pub struct MockLlm {
    chat_replies: Mutex<VecDeque<Value>>,
    intent_replies: Mutex<VecDeque<IntentGuess>>,
    slot_replies: Mutex<VecDeque<BTreeMap<String, String>>>,
    /// When set, every call fails with a timeout.
    pub fail_with_timeout: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, value: Value) {
        self.chat_replies.lock().push_back(value);
    }

    pub fn push_intent(&self, guess: IntentGuess) {
        self.intent_replies.lock().push_back(guess);
    }

    pub fn push_slots(&self, slots: &[(&str, &str)]) {
        self.slot_replies.lock().push_back(
            slots
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    fn usage() -> Usage {
        Usage {
            prompt_tokens: 120,
            completion_tokens: 40,
            total_tokens: 160,
        }
    }

    fn check_failure(&self, op: &str) -> Result<()> {
        self.calls.lock().push(op.to_owned());
        if *self.fail_with_timeout.lock() {
            return Err(Error::Timeout(format!("mock {op}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LlmFacade for MockLlm {
    async fn chat_json(&self, _prompt: &str) -> Result<LlmResponse<Value>> {
        self.check_failure("chat_json")?;
        let value = self
            .chat_replies
            .lock()
            .pop_front()
            .unwrap_or(Value::Object(Default::default()));
        Ok(LlmResponse {
            value,
            usage: Self::usage(),
            model: "mock".into(),
        })
    }

    async fn classify_intent(
        &self,
        _query: &str,
        _context: &str,
    ) -> Result<LlmResponse<IntentGuess>> {
        self.check_failure("classify_intent")?;
        let value = self.intent_replies.lock().pop_front().unwrap_or_default();
        Ok(LlmResponse {
            value,
            usage: Self::usage(),
            model: "mock".into(),
        })
    }

    async fn extract_slots(
        &self,
        _query: &str,
        _schema_fields: &[String],
    ) -> Result<LlmResponse<BTreeMap<String, String>>> {
        self.check_failure("extract_slots")?;
        let value = self.slot_replies.lock().pop_front().unwrap_or_default();
        Ok(LlmResponse {
            value,
            usage: Self::usage(),
            model: "mock".into(),
        })
    }
}
