//! Structured metric events emitted across all Caseflow crates.
//!
//! Sinks are out of scope; every event is serialized to one JSON line on
//! the `tracing` pipeline where a collector can scrape it.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "metric")]
pub enum MetricEvent {
    RequestsTotal {
        skill: String,
        status: &'static str,
    },
    ActiveSessions {
        count: usize,
    },
    BitableQueryLatencySeconds {
        tool: String,
        seconds: f64,
    },
    IntentParseDurationSeconds {
        method: &'static str,
        seconds: f64,
    },
    QuerySemanticConfidence {
        value: f64,
    },
    QueryResolutionTotal {
        source: String,
        status: String,
    },
    QuerySemanticFallbackTotal {
        reason: String,
    },
    FieldFormatTotal {
        field_type: String,
        status: &'static str,
    },
    CallbackDuplicated {
        user_id: String,
        action: String,
    },
    UsageLogWritesTotal {
        result: &'static str,
    },
    LlmCallBlocked {
        skill: String,
        window: &'static str,
    },
}

impl MetricEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(metric_event = %json, "cf_metric");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_metric_tag() {
        let e = MetricEvent::QueryResolutionTotal {
            source: "semantic_slots".into(),
            status: "selected".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["metric"], "QueryResolutionTotal");
        assert_eq!(json["source"], "semantic_slots");
    }
}
