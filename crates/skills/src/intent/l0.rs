//! L0 rule engine — the pre-LLM filter.
//!
//! A declarative list of regex rules over the raw query. A matching rule
//! can short-circuit the pipeline with a final reply, force a specific
//! skill, or hint chit-chat. Rules are compiled once per config load and
//! evaluated in order; the first match wins.

use regex::Regex;

use cf_domain::config::{L0Outcome, L0Rule};

#[derive(Debug, Clone, PartialEq)]
pub enum L0Decision {
    /// Return this text verbatim; the turn is handled.
    Reply(String),
    /// Route to this skill, skipping the planner.
    ForceSkill(String),
    /// Treat as small talk.
    ChitchatHint,
    /// No rule matched.
    None,
}

pub struct L0RuleEngine {
    rules: Vec<(Regex, L0Outcome, String)>,
}

impl L0RuleEngine {
    /// Compile the rule list; malformed patterns are logged and skipped.
    pub fn new(rules: &[L0Rule]) -> Self {
        let compiled = rules
            .iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(re) => Some((re, rule.outcome, rule.value.clone())),
                Err(e) => {
                    tracing::warn!(pattern = %rule.pattern, error = %e, "skipping bad L0 rule");
                    None
                }
            })
            .collect();
        Self { rules: compiled }
    }

    pub fn evaluate(&self, query: &str) -> L0Decision {
        let query = query.trim();
        for (re, outcome, value) in &self.rules {
            if re.is_match(query) {
                return match outcome {
                    L0Outcome::Reply => L0Decision::Reply(value.clone()),
                    L0Outcome::ForceSkill => L0Decision::ForceSkill(value.clone()),
                    L0Outcome::ChitchatHint => L0Decision::ChitchatHint,
                };
            }
        }
        L0Decision::None
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_domain::config::SkillsConfig;

    fn engine() -> L0RuleEngine {
        L0RuleEngine::new(&SkillsConfig::default().l0_rules)
    }

    #[test]
    fn greeting_hints_chitchat() {
        assert_eq!(engine().evaluate("你好"), L0Decision::ChitchatHint);
    }

    #[test]
    fn thanks_replies_directly() {
        match engine().evaluate("谢谢") {
            L0Decision::Reply(text) => assert!(text.contains("不客气")),
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn query_verb_forces_query_skill() {
        assert_eq!(
            engine().evaluate("查一下张三的案件"),
            L0Decision::ForceSkill("QuerySkill".into())
        );
    }

    #[test]
    fn unmatched_text_passes_through() {
        assert_eq!(engine().evaluate("明天开庭的案子有哪些"), L0Decision::None);
    }

    #[test]
    fn bad_patterns_are_skipped() {
        let engine = L0RuleEngine::new(&[cf_domain::config::L0Rule {
            pattern: "([".into(),
            outcome: cf_domain::config::L0Outcome::Reply,
            value: "x".into(),
        }]);
        assert_eq!(engine.rule_count(), 0);
        assert_eq!(engine.evaluate("anything"), L0Decision::None);
    }
}
