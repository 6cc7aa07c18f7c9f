mod bitable;
mod cards;
mod cost;
mod llm;
mod observability;
mod server;
mod skills;
mod state;
mod tables;

pub use bitable::*;
pub use cards::*;
pub use cost::*;
pub use llm::*;
pub use observability::*;
pub use server::*;
pub use skills::*;
pub use state::*;
pub use tables::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bitable: BitableConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub cards: CardsConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load and parse the TOML config file.
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.bitable.app_token.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "bitable.app_token".into(),
                message: "no app token configured; backend calls will fail".into(),
            });
        }
        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured; planner and extractors fall back to rules"
                    .into(),
            });
        }
        if self.state.pending_action_ttl_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "state.pending_action_ttl_secs".into(),
                message: "pending-action TTL must be non-zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.skills.planner_confidence_threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "skills.planner_confidence_threshold".into(),
                message: "threshold must be within [0, 1]".into(),
            });
        }
        for (table_type, profiles) in &self.tables.close_profiles {
            if !profiles.contains_key("default") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("tables.close_profiles.{table_type}"),
                    message: "every table type with close profiles needs a `default`".into(),
                });
            }
        }

        errors
    }
}
