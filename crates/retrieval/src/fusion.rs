//! Multi-source candidate fusion.
//!
//! Takes whatever candidate lists the retrievers produced, unions them by
//! case id, normalizes each source's raw scores over the request, applies
//! structured-field and popularity priors, and computes the weighted final
//! score plus the human-readable "why" tags.

use std::cmp::Ordering;

use fault_match_config::FusionWeights;
use fault_match_core::{Candidate, Hints};

use crate::calibration::{clamp, compute_stats, logistic_from_stats, ScoreStats};

/// Scores closer than this are considered tied.
const TIE_EPSILON: f64 = 1e-6;

/// Component threshold above which a why tag is emitted.
const WHY_THRESHOLD: f64 = 0.6;

/// Union candidate lists by case id.
///
/// The first sighting of an id wins its payload; later sightings only
/// contribute their raw scores and source tags. First-seen order is kept so
/// the merge is deterministic regardless of retriever completion order.
pub fn merge_by_id(lists: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let mut pool: Vec<Candidate> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for list in lists {
        for candidate in list {
            match index.get(&candidate.id) {
                Some(&i) => pool[i].absorb(candidate),
                None => {
                    index.insert(candidate.id.clone(), pool.len());
                    pool.push(candidate);
                }
            }
        }
    }
    pool
}

/// Fuse a merged candidate pool into a ranked list of at most `topn`.
pub fn fuse(
    mut pool: Vec<Candidate>,
    weights: &FusionWeights,
    hints: &Hints,
    popularity_p95: f64,
    topn: usize,
) -> Vec<Candidate> {
    if pool.is_empty() {
        return pool;
    }

    let bm25_stats = source_stats(&pool, |c| c.bm25_raw);
    let cosine_stats = source_stats(&pool, |c| c.cosine_raw);
    let rerank_stats = source_stats(&pool, |c| c.rerank_raw);

    // A source nobody contributed drops out of the weighted sum entirely;
    // the remaining weights are re-normalized so final stays in [0, 1].
    let mut weights = weights.normalized();
    if bm25_stats.is_none() {
        weights.bm25 = 0.0;
    }
    if cosine_stats.is_none() {
        weights.cosine = 0.0;
    }
    if rerank_stats.is_none() {
        weights.rerank = 0.0;
    }
    let weights = weights.normalized();

    let p95_log = popularity_p95.max(crate::calibration::EPSILON).ln_1p();

    for candidate in &mut pool {
        candidate.bm25 = candidate
            .bm25_raw
            .map(|raw| logistic_from_stats(raw, bm25_stats.as_ref(), 1.0));
        candidate.cosine = candidate
            .cosine_raw
            .map(|raw| logistic_from_stats(raw, cosine_stats.as_ref(), 1.0));
        candidate.rerank = candidate
            .rerank_raw
            .map(|raw| logistic_from_stats(raw, rerank_stats.as_ref(), 1.0));

        candidate.kg_prior = kg_prior(candidate, hints);
        candidate.popularity_norm = clamp(candidate.popularity.max(0.0).ln_1p() / p95_log);

        candidate.final_score = clamp(
            weights.rerank * candidate.rerank.unwrap_or(0.0)
                + weights.cosine * candidate.cosine.unwrap_or(0.0)
                + weights.bm25 * candidate.bm25.unwrap_or(0.0)
                + weights.kg_prior * candidate.kg_prior
                + weights.popularity * candidate.popularity_norm,
        );

        candidate.why = why_tags(candidate);
    }

    pool.sort_by(compare_candidates);
    pool.truncate(topn);
    pool
}

fn source_stats<F>(pool: &[Candidate], raw: F) -> Option<ScoreStats>
where
    F: Fn(&Candidate) -> Option<f64>,
{
    let values: Vec<f64> = pool.iter().filter_map(&raw).collect();
    compute_stats(&values)
}

/// Structured-field agreement prior.
///
/// Exact system agreement dominates, exact part agreement is next, and a
/// loose (substring) agreement of both facets still counts for something.
/// Comparisons are case-insensitive; no hints means no prior.
fn kg_prior(candidate: &Candidate, hints: &Hints) -> f64 {
    let mut prior: f64 = 0.0;

    let system = match_pair(hints.system.as_deref(), candidate.system.as_deref());
    let part = match_pair(hints.part.as_deref(), candidate.part.as_deref());

    if system == FacetMatch::Exact {
        prior = prior.max(1.0);
    }
    if part == FacetMatch::Exact {
        prior = prior.max(0.7);
    }
    if system.at_least_loose() && part.at_least_loose() {
        prior = prior.max(0.5);
    }
    prior
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FacetMatch {
    None,
    Loose,
    Exact,
}

impl FacetMatch {
    fn at_least_loose(self) -> bool {
        self != FacetMatch::None
    }
}

fn match_pair(hint: Option<&str>, value: Option<&str>) -> FacetMatch {
    let (Some(hint), Some(value)) = (hint, value) else {
        return FacetMatch::None;
    };
    let hint = hint.trim().to_lowercase();
    let value = value.trim().to_lowercase();
    if hint.is_empty() || value.is_empty() {
        return FacetMatch::None;
    }
    if hint == value {
        FacetMatch::Exact
    } else if hint.contains(&value) || value.contains(&hint) {
        FacetMatch::Loose
    } else {
        FacetMatch::None
    }
}

/// Emit a tag for every component that individually clears the threshold.
/// Tag order is fixed.
fn why_tags(candidate: &Candidate) -> Vec<String> {
    let mut why = Vec::new();
    if candidate.cosine.unwrap_or(0.0) > WHY_THRESHOLD {
        why.push("语义近".to_string());
    }
    if candidate.bm25.unwrap_or(0.0) > WHY_THRESHOLD {
        why.push("关键词命中".to_string());
    }
    if candidate.kg_prior > WHY_THRESHOLD {
        if candidate.kg_prior >= 1.0 {
            why.push("系统一致".to_string());
        } else {
            why.push("部件相近".to_string());
        }
    }
    if candidate.popularity_norm > WHY_THRESHOLD {
        why.push("高热度".to_string());
    }
    if candidate.rerank.unwrap_or(0.0) > WHY_THRESHOLD {
        why.push("精排优".to_string());
    }
    why
}

/// Descending final score; ties within `TIE_EPSILON` prefer higher rerank,
/// then higher cosine, then the lexicographically smaller id.
fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    if (a.final_score - b.final_score).abs() > TIE_EPSILON {
        return b
            .final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(Ordering::Equal);
    }
    let (ra, rb) = (a.rerank.unwrap_or(0.0), b.rerank.unwrap_or(0.0));
    if (ra - rb).abs() > TIE_EPSILON {
        return rb.partial_cmp(&ra).unwrap_or(Ordering::Equal);
    }
    let (ca, cb) = (a.cosine.unwrap_or(0.0), b.cosine.unwrap_or(0.0));
    if (ca - cb).abs() > TIE_EPSILON {
        return cb.partial_cmp(&ca).unwrap_or(Ordering::Equal);
    }
    a.id.cmp(&b.id)
}
