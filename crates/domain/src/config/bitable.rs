use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bitable backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitableConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// App token identifying the low-code base.
    #[serde(default)]
    pub app_token: String,
    /// Environment variable holding the backend bearer token.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
    #[serde(default = "d_page_size")]
    pub page_size: u32,
    /// Table / field metadata cache TTL.
    #[serde(default = "d_600")]
    pub schema_cache_ttl_secs: u64,
    /// Local-fallback bounds when the backend rejects a filter: at most
    /// `local_scan_max_pages` pages of `page_size` are fetched and
    /// filtered in-process.
    #[serde(default = "d_3")]
    pub local_scan_max_pages: u32,
}

impl Default for BitableConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            app_token: String::new(),
            token_env: d_token_env(),
            timeout_ms: 10_000,
            page_size: 20,
            schema_cache_ttl_secs: 600,
            local_scan_max_pages: 3,
        }
    }
}

fn d_base_url() -> String {
    "https://open.example.com/bitable/v1".into()
}
fn d_token_env() -> String {
    "CF_BITABLE_TOKEN".into()
}
fn d_10000() -> u64 {
    10_000
}
fn d_page_size() -> u32 {
    20
}
fn d_600() -> u64 {
    600
}
fn d_3() -> u32 {
    3
}
