//! Regex-based semantic slot extraction.
//!
//! Detects two slot families with a confidence score: case identifiers
//! (labelled "案号/项目ID/编号" or an unlabelled `XX-12345`-shaped token)
//! and party/client labels. Gated by config; skips emit a
//! `query_semantic_fallback_total{reason}` counter.

use regex::Regex;

use cf_domain::metric::MetricEvent;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticSlots {
    /// A case identifier, e.g. `(2024)粤0101民初100号` or `AJ-2024001`.
    pub case_identifier: Option<String>,
    /// A party / client name extracted from a labelled phrase.
    pub party: Option<String>,
    pub confidence: f64,
}

impl SemanticSlots {
    pub fn is_empty(&self) -> bool {
        self.case_identifier.is_none() && self.party.is_none()
    }
}

pub struct SemanticExtractor {
    labeled_identifier: Regex,
    unlabeled_identifier: Regex,
    court_case_no: Regex,
    party_label: Regex,
}

impl SemanticExtractor {
    pub fn new() -> Self {
        Self {
            labeled_identifier: Regex::new(
                r"(?:案号|项目ID|项目编号|编号)[:：是为\s]*([\(（]?[0-9]{4}[\)）]?[^\s,，。]{2,40}|[A-Za-z]{2,}[-_]?\d{4,})",
            )
            .expect("static regex"),
            unlabeled_identifier: Regex::new(r"\b([A-Z]{2,}-\d{4,})\b").expect("static regex"),
            court_case_no: Regex::new(r"[\(（]\d{4}[\)）][^\s,，。]{3,40}号").expect("static regex"),
            party_label: Regex::new(
                r"(?:委托人|当事人|客户|对方当事人)[:：是为\s]*([^\s,，。的]{2,20})",
            )
            .expect("static regex"),
        }
    }

    /// Extract slots with a confidence in `[0, 1]`.
    pub fn extract(&self, query: &str) -> SemanticSlots {
        let mut slots = SemanticSlots::default();

        if let Some(caps) = self.labeled_identifier.captures(query) {
            slots.case_identifier = Some(caps[1].trim().to_owned());
            slots.confidence = 0.9;
        } else if let Some(m) = self.court_case_no.find(query) {
            slots.case_identifier = Some(m.as_str().to_owned());
            slots.confidence = 0.85;
        } else if let Some(caps) = self.unlabeled_identifier.captures(query) {
            slots.case_identifier = Some(caps[1].to_owned());
            slots.confidence = 0.7;
        }

        if let Some(caps) = self.party_label.captures(query) {
            slots.party = Some(caps[1].trim().to_owned());
            if slots.confidence == 0.0 {
                slots.confidence = 0.8;
            }
        }

        slots
    }

    /// Gated extraction used by the compiler. Returns `None` (with the
    /// fallback counter) when disabled, empty, or under-confident.
    pub fn extract_gated(
        &self,
        query: &str,
        enabled: bool,
        threshold: f64,
    ) -> Option<SemanticSlots> {
        if !enabled {
            MetricEvent::QuerySemanticFallbackTotal {
                reason: "disabled".into(),
            }
            .emit();
            return None;
        }
        let slots = self.extract(query);
        if slots.is_empty() {
            MetricEvent::QuerySemanticFallbackTotal {
                reason: "no_slots".into(),
            }
            .emit();
            return None;
        }
        MetricEvent::QuerySemanticConfidence {
            value: slots.confidence,
        }
        .emit();
        if slots.confidence < threshold {
            MetricEvent::QuerySemanticFallbackTotal {
                reason: "low_confidence".into(),
            }
            .emit();
            return None;
        }
        Some(slots)
    }
}

impl Default for SemanticExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labeled_case_no_extracts() {
        let slots = SemanticExtractor::new().extract("查案号(2024)粤0101民初100号");
        assert_eq!(slots.case_identifier.as_deref(), Some("(2024)粤0101民初100号"));
        assert!(slots.confidence >= 0.9);
    }

    #[test]
    fn court_shaped_token_extracts_unlabeled() {
        let slots = SemanticExtractor::new().extract("看看(2024)粤0101民初100号进展如何");
        assert_eq!(slots.case_identifier.as_deref(), Some("(2024)粤0101民初100号"));
    }

    #[test]
    fn project_id_token_extracts() {
        let slots = SemanticExtractor::new().extract("查 AJ-20240101 的情况");
        assert_eq!(slots.case_identifier.as_deref(), Some("AJ-20240101"));
        assert!(slots.confidence >= 0.7);
    }

    #[test]
    fn party_label_extracts() {
        let slots = SemanticExtractor::new().extract("委托人是张三的案件");
        assert_eq!(slots.party.as_deref(), Some("张三"));
    }

    #[test]
    fn gate_rejects_low_confidence() {
        let ex = SemanticExtractor::new();
        assert!(ex.extract_gated("查 AJ-20240101", true, 0.8).is_none());
        assert!(ex.extract_gated("查 AJ-20240101", true, 0.6).is_some());
        assert!(ex.extract_gated("查 AJ-20240101", false, 0.0).is_none());
    }

    #[test]
    fn plain_text_has_no_slots() {
        assert!(SemanticExtractor::new().extract("查所有案件").is_empty());
    }
}
