//! The LLM facade: three narrow operations (`chat_json`,
//! `classify_intent`, `extract_slots`) behind one trait, with an
//! OpenAI-compatible HTTP implementation and a scriptable mock for tests.

pub mod facade;
pub mod mock;
pub mod openai;

pub use facade::{IntentGuess, LlmFacade, LlmResponse, NullLlm, TablePick, Usage};
pub use mock::MockLlm;
pub use openai::OpenAiCompatLlm;
