//! Gray-zone routing.
//!
//! Converts the top fused score into a decision via a pair of thresholds:
//! at or above `pass` the match is returned directly, inside
//! `[gray_low, pass)` it needs secondary adjudication, below `gray_low` it
//! is rejected. "No candidates at all" is a distinct outcome (`no_match`)
//! so callers can always tell an empty result from a low-confidence one.

use fault_match_config::Settings;
use fault_match_core::{Alternative, Candidate, Decision, DecisionMode, LlmVerdict};

/// Routing thresholds `(pass, gray_low)`.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub pass: f64,
    pub gray_low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pass: 0.84,
            gray_low: 0.65,
        }
    }
}

impl From<&Settings> for Thresholds {
    fn from(settings: &Settings) -> Self {
        Self {
            pass: settings.pass_threshold,
            gray_low: settings.gray_low_threshold,
        }
    }
}

/// How many runners-up a gray decision carries.
const MAX_ALTERNATIVES: usize = 3;

fn alternatives(candidates: &[Candidate], exclude: &str) -> Vec<Alternative> {
    candidates
        .iter()
        .filter(|c| c.id != exclude)
        .take(MAX_ALTERNATIVES)
        .map(|c| Alternative {
            id: c.id.clone(),
            text: c.text.chars().take(100).collect(),
            score: c.final_score,
        })
        .collect()
}

/// Route the ranked candidates. Total: every input yields exactly one mode.
pub fn decide(candidates: &[Candidate], thresholds: &Thresholds) -> Decision {
    let Some(top) = candidates.first() else {
        return Decision::no_match("no candidates");
    };
    let score = top.final_score;

    if score >= thresholds.pass {
        return Decision {
            mode: DecisionMode::Direct,
            chosen_id: Some(top.id.clone()),
            confidence: score,
            reason: format!("high confidence (score: {score:.3})"),
            llm: None,
            alternatives: Vec::new(),
        };
    }
    if score >= thresholds.gray_low {
        return Decision {
            mode: DecisionMode::Gray,
            chosen_id: Some(top.id.clone()),
            confidence: score,
            reason: format!("gray band (score: {score:.3})"),
            llm: None,
            alternatives: alternatives(candidates, &top.id),
        };
    }
    Decision {
        mode: DecisionMode::Reject,
        chosen_id: None,
        confidence: score,
        reason: format!("below gray_low (score: {score:.3})"),
        llm: None,
        alternatives: Vec::new(),
    }
}

/// Fold the picker's verdict into a gray decision.
///
/// A concrete pick from inside the submitted set upgrades the decision to
/// `llm` with `confidence = max(final, llm.confidence)`. `UNKNOWN` (or an
/// id that was never submitted) leaves the gray decision in place with the
/// verdict attached and its reason appended.
pub fn apply_llm_verdict(
    base: Decision,
    verdict: LlmVerdict,
    candidates: &[Candidate],
    submitted: usize,
) -> Decision {
    let submitted = &candidates[..candidates.len().min(submitted)];
    let chosen = (!verdict.is_unknown())
        .then(|| submitted.iter().find(|c| c.id == verdict.chosen_id))
        .flatten();

    match chosen {
        Some(candidate) => {
            let confidence = base.confidence.max(verdict.confidence);
            Decision {
                mode: DecisionMode::Llm,
                chosen_id: Some(candidate.id.clone()),
                confidence,
                reason: verdict
                    .reason
                    .clone()
                    .unwrap_or_else(|| "llm pick".to_string()),
                alternatives: alternatives(candidates, &candidate.id),
                llm: Some(verdict),
            }
        }
        None => {
            let mut decision = base;
            if let Some(reason) = verdict.reason.as_deref() {
                decision.reason = format!("{}; llm: {reason}", decision.reason);
            }
            decision.llm = Some(verdict);
            decision
        }
    }
}
