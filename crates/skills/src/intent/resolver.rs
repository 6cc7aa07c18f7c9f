//! Intent resolution: rule hints first, then the planner LLM, then the
//! keyword parser. Produces a [`SkillMatch`] and records parse timing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use cf_domain::metric::MetricEvent;
use cf_domain::types::PlannerPlan;
use cf_llm::LlmFacade;

use crate::intent::keyword::KeywordIntentParser;
use crate::intent::l0::{L0Decision, L0RuleEngine};

/// The routing decision for one message.
#[derive(Debug, Clone)]
pub struct SkillMatch {
    pub skill: String,
    pub confidence: f64,
    /// `l0` | `planner` | `keyword`.
    pub source: &'static str,
    pub params: BTreeMap<String, String>,
    pub plan: Option<PlannerPlan>,
}

pub struct IntentResolver {
    l0: L0RuleEngine,
    keyword: KeywordIntentParser,
    llm: Arc<dyn LlmFacade>,
    planner_threshold: f64,
    planner_timeout: std::time::Duration,
}

impl IntentResolver {
    pub fn new(
        l0: L0RuleEngine,
        llm: Arc<dyn LlmFacade>,
        planner_threshold: f64,
        planner_timeout_ms: u64,
    ) -> Self {
        Self {
            l0,
            keyword: KeywordIntentParser::new(),
            llm,
            planner_threshold,
            planner_timeout: std::time::Duration::from_millis(planner_timeout_ms),
        }
    }

    /// Evaluate the L0 rules only (the orchestrator consults this before
    /// anything else so a final reply can skip the LLM entirely).
    pub fn l0_decision(&self, query: &str) -> L0Decision {
        self.l0.evaluate(query)
    }

    /// Full resolution: planner (timeout-bounded, confidence-gated), then
    /// keyword fallback. `llm_allowed` is false when the cost guard has
    /// blocked LLM calls for this request.
    pub async fn resolve(&self, query: &str, context: &str, llm_allowed: bool) -> SkillMatch {
        if llm_allowed {
            let started = Instant::now();
            let planner = tokio::time::timeout(
                self.planner_timeout,
                self.llm.classify_intent(query, context),
            )
            .await;
            let elapsed = started.elapsed().as_secs_f64();
            MetricEvent::IntentParseDurationSeconds {
                method: "planner",
                seconds: elapsed,
            }
            .emit();

            match planner {
                Ok(Ok(resp)) => {
                    let guess = resp.value;
                    if !guess.skill.is_empty() && guess.confidence >= self.planner_threshold {
                        return SkillMatch {
                            skill: guess.skill.clone(),
                            confidence: guess.confidence,
                            source: "planner",
                            params: guess.params.clone(),
                            plan: Some(PlannerPlan {
                                scenario: guess.scenario,
                                tool: guess.tool,
                                confidence: guess.confidence,
                                params: guess.params,
                            }),
                        };
                    }
                    tracing::debug!(
                        skill = %guess.skill,
                        confidence = guess.confidence,
                        "planner under threshold, falling back to keyword parser"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "planner call failed");
                }
                Err(_) => {
                    tracing::warn!("planner call timed out");
                }
            }
        }

        let started = Instant::now();
        let (skill, confidence) = self.keyword.parse(query);
        MetricEvent::IntentParseDurationSeconds {
            method: "keyword",
            seconds: started.elapsed().as_secs_f64(),
        }
        .emit();

        SkillMatch {
            skill,
            confidence,
            source: "keyword",
            params: BTreeMap::new(),
            plan: None,
        }
    }
}
