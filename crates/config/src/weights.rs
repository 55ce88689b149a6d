//! Fusion weight vector.

use serde::{Deserialize, Serialize};

/// Weights for the fused final score, one per signal.
///
/// Raw weights may come from defaults, the calibration profile, or
/// `FUSION_<SOURCE>_WEIGHT` environment overrides; before use they are
/// re-normalized so they sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub rerank: f64,
    pub cosine: f64,
    pub bm25: f64,
    pub kg_prior: f64,
    pub popularity: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            rerank: 0.55,
            cosine: 0.20,
            bm25: 0.10,
            kg_prior: 0.10,
            popularity: 0.05,
        }
    }
}

impl FusionWeights {
    pub fn sum(&self) -> f64 {
        self.rerank + self.cosine + self.bm25 + self.kg_prior + self.popularity
    }

    /// Clamp negative entries to zero and scale so the weights sum to 1.
    /// An all-zero vector restores the defaults.
    pub fn normalized(&self) -> Self {
        let clamped = Self {
            rerank: self.rerank.max(0.0),
            cosine: self.cosine.max(0.0),
            bm25: self.bm25.max(0.0),
            kg_prior: self.kg_prior.max(0.0),
            popularity: self.popularity.max(0.0),
        };
        let total = clamped.sum();
        if total <= 0.0 {
            return Self::default();
        }
        Self {
            rerank: clamped.rerank / total,
            cosine: clamped.cosine / total,
            bm25: clamped.bm25 / total,
            kg_prior: clamped.kg_prior / total,
            popularity: clamped.popularity / total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sum_to_one() {
        assert!((FusionWeights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalized_scales_to_unit_sum() {
        let w = FusionWeights {
            rerank: 2.0,
            cosine: 1.0,
            bm25: 1.0,
            kg_prior: 0.0,
            popularity: 0.0,
        };
        let n = w.normalized();
        assert!((n.sum() - 1.0).abs() < 1e-9);
        assert!((n.rerank - 0.5).abs() < 1e-9);
    }

    #[test]
    fn all_zero_restores_defaults() {
        let w = FusionWeights {
            rerank: 0.0,
            cosine: 0.0,
            bm25: 0.0,
            kg_prior: 0.0,
            popularity: 0.0,
        };
        assert_eq!(w.normalized(), FusionWeights::default());
    }

    #[test]
    fn negative_entries_are_clamped() {
        let w = FusionWeights {
            rerank: -1.0,
            cosine: 1.0,
            bm25: 0.0,
            kg_prior: 0.0,
            popularity: 0.0,
        };
        let n = w.normalized();
        assert_eq!(n.rerank, 0.0);
        assert!((n.cosine - 1.0).abs() < 1e-9);
    }
}
