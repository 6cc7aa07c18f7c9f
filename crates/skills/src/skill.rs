//! The skill execution seam and the name-keyed registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use cf_bitable::{BitableClient, SchemaCache};
use cf_domain::config::{SkillsConfig, TablesConfig};
use cf_domain::types::{SkillContext, SkillResult};
use cf_llm::LlmFacade;

/// Uniform execution contract. Skills never touch the state store; they
/// read `ctx.extra` snapshots and describe slot changes through the
/// result's data payload.
#[async_trait::async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, ctx: &SkillContext) -> SkillResult;
}

/// Shared dependencies handed to every skill at construction.
#[derive(Clone)]
pub struct SkillDeps {
    pub client: Arc<dyn BitableClient>,
    pub schema: Arc<SchemaCache>,
    pub llm: Arc<dyn LlmFacade>,
    pub tables: Arc<TablesConfig>,
    pub skills: Arc<SkillsConfig>,
    /// Default TTL for proposed pending actions, in seconds.
    pub pending_ttl_secs: u64,
}

/// In-memory skills registry, rebuildable on config reload.
pub struct SkillRegistry {
    entries: RwLock<HashMap<String, Arc<dyn Skill>>>,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, skill: Arc<dyn Skill>) {
        self.entries
            .write()
            .insert(skill.name().to_owned(), skill);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.entries.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Swap the whole skill set atomically (config reload).
    pub fn replace_all(&self, skills: Vec<Arc<dyn Skill>>) {
        let mut entries = HashMap::new();
        for skill in skills {
            entries.insert(skill.name().to_owned(), skill);
        }
        let count = entries.len();
        *self.entries.write() = entries;
        tracing::info!(skills_count = count, "skill registry rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSkill;

    #[async_trait::async_trait]
    impl Skill for EchoSkill {
        fn name(&self) -> &'static str {
            "EchoSkill"
        }
        async fn execute(&self, ctx: &SkillContext) -> SkillResult {
            SkillResult::ok("EchoSkill", ctx.query.clone())
        }
    }

    #[tokio::test]
    async fn register_and_dispatch() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(EchoSkill));
        let skill = registry.get("EchoSkill").unwrap();
        let result = skill
            .execute(&SkillContext::new("你好", "u1"))
            .await;
        assert!(result.success);
        assert_eq!(result.reply_text, "你好");
    }

    #[test]
    fn replace_all_swaps_atomically() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(EchoSkill));
        registry.replace_all(vec![Arc::new(EchoSkill)]);
        assert_eq!(registry.names(), vec!["EchoSkill".to_string()]);
    }
}
