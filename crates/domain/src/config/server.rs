use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_3210")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Environment variable holding the channel-adapter signing secret.
    /// When the env var is unset, signature verification is skipped
    /// (dev mode).
    #[serde(default = "d_signing_secret_env")]
    pub signing_secret_env: String,
    /// Maximum concurrently-processed requests before the adapter is told
    /// to retry (backpressure bound).
    #[serde(default = "d_64")]
    pub max_in_flight: usize,
    /// Per-request deadline; external calls inherit what is left of it.
    #[serde(default = "d_30000")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3210,
            host: "127.0.0.1".into(),
            signing_secret_env: d_signing_secret_env(),
            max_in_flight: 64,
            request_timeout_ms: 30_000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3210() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_signing_secret_env() -> String {
    "CF_CHANNEL_SECRET".into()
}
fn d_64() -> usize {
    64
}
fn d_30000() -> u64 {
    30_000
}
