//! Routing decisions produced by the gray-zone router.

use serde::{Deserialize, Serialize};

/// How the top match should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Top score cleared the pass threshold; return it directly
    Direct,
    /// Top score fell in the gray band; secondary adjudication advised
    Gray,
    /// Top score below the gray band
    Reject,
    /// An LLM adjudicated the gray band and picked a concrete candidate
    Llm,
    /// No candidates at all (empty query, empty results, or all sources failed).
    /// Deliberately distinct from `Reject` so callers can tell them apart.
    NoMatch,
}

/// Structured verdict returned by the closed-set LLM picker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmVerdict {
    /// One of the submitted candidate ids, or the literal `UNKNOWN`
    pub chosen_id: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LlmVerdict {
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// Verdict used whenever the picker fails or returns malformed output.
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            chosen_id: Self::UNKNOWN.to_string(),
            confidence: 0.0,
            reason: Some(reason.into()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.chosen_id == Self::UNKNOWN
    }
}

/// A runner-up shown alongside gray and llm decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub id: String,
    pub text: String,
    pub score: f64,
}

/// The routing decision for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub mode: DecisionMode,
    pub chosen_id: Option<String>,
    pub confidence: f64,
    pub reason: String,
    /// Present only when the LLM picker ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmVerdict>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub alternatives: Vec<Alternative>,
}

impl Decision {
    pub fn no_match(reason: impl Into<String>) -> Self {
        Self {
            mode: DecisionMode::NoMatch,
            chosen_id: None,
            confidence: 0.0,
            reason: reason.into(),
            llm: None,
            alternatives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_serialize_snake_case() {
        let d = Decision::no_match("no candidates");
        let v = serde_json::to_value(&d).expect("json");
        assert_eq!(v["mode"], "no_match");
        assert_eq!(v["chosen_id"], serde_json::Value::Null);
        assert!(v.get("llm").is_none());
    }

    #[test]
    fn unknown_verdict_carries_zero_confidence() {
        let v = LlmVerdict::unknown("llm parse failure");
        assert!(v.is_unknown());
        assert_eq!(v.confidence, 0.0);
    }
}
