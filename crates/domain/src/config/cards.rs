use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Card rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardsConfig {
    /// Root directory of the template fragment tree
    /// (`wrapper/`, `action/`, `query/`).
    #[serde(default = "d_templates_root")]
    pub templates_root: String,
    /// Rendered-template cache entries (keyed by path + value fingerprint).
    #[serde(default = "d_128")]
    pub template_cache_size: usize,
    /// Query-list card style: `v1` compact, `v2` rich.
    #[serde(default = "d_v1")]
    pub query_list_style: String,
    /// Records shown per list card.
    #[serde(default = "d_5")]
    pub list_page_size: usize,
    #[serde(default)]
    pub personalization: PersonalizationConfig,
}

/// Tone/length reply transforms. Disabled by default; chit-chat replies
/// bypass it unconditionally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalizationConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for CardsConfig {
    fn default() -> Self {
        Self {
            templates_root: d_templates_root(),
            template_cache_size: 128,
            query_list_style: "v1".into(),
            list_page_size: 5,
            personalization: PersonalizationConfig::default(),
        }
    }
}

fn d_templates_root() -> String {
    "templates".into()
}
fn d_128() -> usize {
    128
}
fn d_v1() -> String {
    "v1".into()
}
fn d_5() -> usize {
    5
}
