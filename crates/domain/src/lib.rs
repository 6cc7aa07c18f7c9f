//! Shared domain types for all Caseflow crates: the error enum, the config
//! tree, the skill request/response value types, bitable records, pending
//! actions, and the structured metric events.

pub mod config;
pub mod error;
pub mod messages;
pub mod metric;
pub mod pending;
pub mod record;
pub mod types;

pub use error::{Error, Result};

/// The agent's fixed display timezone. All user-facing timestamps render
/// in UTC+8 regardless of server locale.
pub const AGENT_TZ: chrono_tz::Tz = chrono_tz::Asia::Shanghai;
