//! Chit-chat skill: canned small-talk replies from a YAML response pool,
//! optionally backed by the LLM when the pool has no fit.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use cf_domain::types::{SkillContext, SkillData, SkillResult};

use crate::skill::{Skill, SkillDeps};

pub struct ChitchatSkill {
    deps: SkillDeps,
    pool: Vec<String>,
    cursor: AtomicUsize,
}

const BUILTIN_POOL: &[&str] = &[
    "你好，我是小敬，可以帮你查案件、录进展、盯开庭时间。",
    "在的，有什么案件或合同上的事需要我处理吗？",
    "收到～需要查数据还是记录进展，直接说就行。",
];

impl ChitchatSkill {
    pub fn new(deps: SkillDeps) -> Self {
        let pool = Self::load_pool(Path::new(&deps.skills.casual_responses_path));
        Self {
            deps,
            pool,
            cursor: AtomicUsize::new(0),
        }
    }

    fn load_pool(path: &Path) -> Vec<String> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return BUILTIN_POOL.iter().map(|s| s.to_string()).collect();
        };
        match serde_yaml::from_str::<serde_yaml::Value>(&raw) {
            Ok(serde_yaml::Value::Sequence(items)) => {
                let pool: Vec<String> = items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .filter(|s| !s.trim().is_empty())
                    .collect();
                if pool.is_empty() {
                    BUILTIN_POOL.iter().map(|s| s.to_string()).collect()
                } else {
                    pool
                }
            }
            Ok(serde_yaml::Value::Mapping(map)) => map
                .get("responses")
                .and_then(|v| v.as_sequence())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_else(|| BUILTIN_POOL.iter().map(|s| s.to_string()).collect()),
            _ => BUILTIN_POOL.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn next_canned(&self) -> String {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pool.len().max(1);
        self.pool
            .get(idx)
            .cloned()
            .unwrap_or_else(|| BUILTIN_POOL[0].to_owned())
    }
}

#[async_trait::async_trait]
impl Skill for ChitchatSkill {
    fn name(&self) -> &'static str {
        "ChitchatSkill"
    }

    async fn execute(&self, ctx: &SkillContext) -> SkillResult {
        let reply = if self.deps.skills.chitchat_allow_llm {
            let prompt = format!(
                "你是法律实务助理{}。用一两句自然的中文回应这句寒暄，输出 JSON：{{\"reply\": \"...\"}}。\
                 用户：{}",
                self.deps.skills.assistant_name, ctx.query
            );
            match self.deps.llm.chat_json(&prompt).await {
                Ok(resp) => resp
                    .value
                    .get("reply")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_else(|| self.next_canned()),
                Err(e) => {
                    tracing::debug!(error = %e, "chitchat LLM unavailable, using pool");
                    self.next_canned()
                }
            }
        } else {
            self.next_canned()
        };

        let mut data = SkillData::default();
        data.chitchat = true;
        let mut result = SkillResult::ok("ChitchatSkill", reply);
        result.reply_type = cf_domain::types::ReplyType::Text;
        result.data = data;
        result
    }
}
