//! Command-line surface.

pub mod config_cmd;
pub mod reload;

use clap::{Parser, Subcommand};

/// Caseflow — a conversational agent for legal-practice records.
#[derive(Debug, Parser)]
#[command(name = "caseflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve,
    /// Ask a running server to re-read the skills config and L0 rules
    /// and rebuild its router without dropping in-flight requests.
    ReloadConfig {
        /// Base URL of the running server.
        #[arg(long, default_value = "http://127.0.0.1:3210")]
        server: String,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and print any issues.
    Validate,
}

/// Config file path: `CF_CONFIG` env override, else `caseflow.toml`.
pub fn config_path() -> String {
    std::env::var("CF_CONFIG").unwrap_or_else(|_| "caseflow.toml".into())
}
