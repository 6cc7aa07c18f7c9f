//! Cost & rate guard for LLM calls.
//!
//! Rolling windows indexed by `(skill, hour)` and `(skill, day)`. A call
//! is blocked once the window's accumulated cost crosses its threshold;
//! blocked calls get a user-visible guidance message instead of an LLM
//! reply. Optional circuit-breaker mode disables all LLM calls for the
//! rest of a window once any threshold is crossed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use cf_domain::config::CostConfig;
use cf_domain::metric::MetricEvent;
use cf_state::TimeSource;

pub struct CostGuard {
    cfg: CostConfig,
    time: Arc<dyn TimeSource>,
    spent: Mutex<HashMap<(String, String), f64>>,
    /// Window key that tripped the breaker, if any.
    tripped: Mutex<Option<String>>,
}

impl CostGuard {
    pub fn new(cfg: CostConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            cfg,
            time,
            spent: Mutex::new(HashMap::new()),
            tripped: Mutex::new(None),
        }
    }

    fn hour_key(now: DateTime<Utc>) -> String {
        now.format("H:%Y-%m-%d-%H").to_string()
    }

    fn day_key(now: DateTime<Utc>) -> String {
        now.format("D:%Y-%m-%d").to_string()
    }

    fn hourly_limit(&self, skill: &str) -> f64 {
        self.cfg
            .hourly_usd
            .get(skill)
            .copied()
            .unwrap_or(self.cfg.default_hourly_usd)
    }

    fn daily_limit(&self, skill: &str) -> f64 {
        self.cfg
            .daily_usd
            .get(skill)
            .copied()
            .unwrap_or(self.cfg.default_daily_usd)
    }

    /// Whether an LLM call may proceed for this skill. Returns the
    /// guidance message to show when blocked.
    pub fn check_call_allowed(&self, skill: &str) -> (bool, String) {
        if !self.cfg.enabled {
            return (true, String::new());
        }
        let now = self.time.now();

        if self.cfg.circuit_breaker {
            let tripped = self.tripped.lock();
            if let Some(window) = tripped.as_ref() {
                // Still inside the tripped window?
                if *window == Self::hour_key(now) || *window == Self::day_key(now) {
                    return (false, self.cfg.blocked_guidance.clone());
                }
            }
        }

        let spent = self.spent.lock();
        let hour_spent = spent
            .get(&(skill.to_owned(), Self::hour_key(now)))
            .copied()
            .unwrap_or(0.0);
        if hour_spent >= self.hourly_limit(skill) {
            MetricEvent::LlmCallBlocked {
                skill: skill.to_owned(),
                window: "hour",
            }
            .emit();
            self.maybe_trip(Self::hour_key(now));
            return (false, self.cfg.blocked_guidance.clone());
        }
        let day_spent = spent
            .get(&(skill.to_owned(), Self::day_key(now)))
            .copied()
            .unwrap_or(0.0);
        if day_spent >= self.daily_limit(skill) {
            MetricEvent::LlmCallBlocked {
                skill: skill.to_owned(),
                window: "day",
            }
            .emit();
            self.maybe_trip(Self::day_key(now));
            return (false, self.cfg.blocked_guidance.clone());
        }
        (true, String::new())
    }

    fn maybe_trip(&self, window: String) {
        if self.cfg.circuit_breaker {
            *self.tripped.lock() = Some(window);
        }
    }

    /// Record the cost of a successful call against both windows.
    pub fn record_cost(&self, skill: &str, cost_usd: f64) {
        if cost_usd <= 0.0 {
            return;
        }
        let now = self.time.now();
        let mut spent = self.spent.lock();
        *spent
            .entry((skill.to_owned(), Self::hour_key(now)))
            .or_insert(0.0) += cost_usd;
        *spent
            .entry((skill.to_owned(), Self::day_key(now)))
            .or_insert(0.0) += cost_usd;

        // Old windows never get read again; drop them opportunistically.
        if spent.len() > 512 {
            let hour = Self::hour_key(now);
            let day = Self::day_key(now);
            spent.retain(|(_, window), _| *window == hour || *window == day);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_state::ManualTime;

    fn guard(hourly: f64, circuit: bool) -> (CostGuard, ManualTime) {
        let time = ManualTime::new(Utc::now());
        let cfg = CostConfig {
            enabled: true,
            default_hourly_usd: hourly,
            default_daily_usd: 100.0,
            circuit_breaker: circuit,
            ..Default::default()
        };
        (CostGuard::new(cfg, Arc::new(time.clone())), time)
    }

    #[test]
    fn under_limit_allows() {
        let (guard, _time) = guard(1.0, false);
        guard.record_cost("QuerySkill", 0.5);
        assert!(guard.check_call_allowed("QuerySkill").0);
    }

    #[test]
    fn crossing_hourly_limit_blocks_with_guidance() {
        let (guard, _time) = guard(1.0, false);
        guard.record_cost("QuerySkill", 1.2);
        let (allowed, guidance) = guard.check_call_allowed("QuerySkill");
        assert!(!allowed);
        assert!(guidance.contains("明确指令"));
        // Other skills have their own windows.
        assert!(guard.check_call_allowed("CreateSkill").0);
    }

    #[test]
    fn window_rolls_over() {
        let (guard, time) = guard(1.0, false);
        guard.record_cost("QuerySkill", 1.2);
        assert!(!guard.check_call_allowed("QuerySkill").0);
        time.advance_secs(3601);
        assert!(guard.check_call_allowed("QuerySkill").0);
    }

    #[test]
    fn circuit_breaker_blocks_everything_in_window() {
        let (guard, _time) = guard(1.0, true);
        guard.record_cost("QuerySkill", 1.2);
        assert!(!guard.check_call_allowed("QuerySkill").0);
        // The breaker now blocks unrelated skills too.
        assert!(!guard.check_call_allowed("CreateSkill").0);
    }

    #[test]
    fn disabled_guard_always_allows() {
        let time = ManualTime::new(Utc::now());
        let guard = CostGuard::new(
            CostConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(time),
        );
        guard.record_cost("QuerySkill", 999.0);
        assert!(guard.check_call_allowed("QuerySkill").0);
    }
}
