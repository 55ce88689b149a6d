//! Cross-encoder reranker.
//!
//! Scores `(query, candidate_text)` pairs jointly and squashes the logits
//! through the sigmoid, so callers always see `[0, 1]` probabilities. The
//! real model runs through ONNX behind the `onnx` feature; without it a
//! character-bigram overlap scorer keeps the pipeline deterministic and
//! runnable.

use std::sync::Arc;

use once_cell::sync::OnceCell;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{GraphOptimizationLevel, Session};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use crate::calibration::sigmoid;
use crate::RetrievalError;

/// Reranker configuration
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Maximum sequence length for the joint encoding
    pub max_seq_len: usize,
    /// Pairs scored per batch
    pub batch_size: usize,
    /// ONNX model file
    pub model_path: String,
    /// Tokenizer file
    pub tokenizer_path: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            max_seq_len: 512,
            batch_size: 16,
            model_path: "models/reranker/model.onnx".to_string(),
            tokenizer_path: "models/reranker/tokenizer.json".to_string(),
        }
    }
}

/// Cross-encoder over `(query, text)` pairs.
pub struct CrossEncoder {
    #[cfg(feature = "onnx")]
    session: Session,
    #[cfg(feature = "onnx")]
    tokenizer: Tokenizer,
    config: RerankerConfig,
}

/// Process-wide reranker, loaded lazily on first use.
static RERANKER: OnceCell<Arc<CrossEncoder>> = OnceCell::new();

pub fn global_reranker(config: RerankerConfig) -> Result<Arc<CrossEncoder>, RetrievalError> {
    RERANKER
        .get_or_try_init(|| CrossEncoder::new(config).map(Arc::new))
        .cloned()
}

impl CrossEncoder {
    #[cfg(feature = "onnx")]
    pub fn new(config: RerankerConfig) -> Result<Self, RetrievalError> {
        let session = Session::builder()
            .map_err(|e| RetrievalError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RetrievalError::Model(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| RetrievalError::Model(e.to_string()))?
            .commit_from_file(&config.model_path)
            .map_err(|e| RetrievalError::Model(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| RetrievalError::Model(e.to_string()))?;

        Ok(Self {
            session,
            tokenizer,
            config,
        })
    }

    #[cfg(not(feature = "onnx"))]
    pub fn new(config: RerankerConfig) -> Result<Self, RetrievalError> {
        Ok(Self { config })
    }

    /// Score the query against each candidate text.
    ///
    /// Returns one probability in `[0, 1]` per text, in input order.
    /// Deterministic for identical inputs modulo floating-point noise.
    pub fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>, RetrievalError> {
        let mut scores = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            for text in chunk {
                scores.push(self.score_pair(query, text)?);
            }
        }
        Ok(scores)
    }

    #[cfg(feature = "onnx")]
    fn score_pair(&self, query: &str, text: &str) -> Result<f64, RetrievalError> {
        let encoding = self
            .tokenizer
            .encode((query, text), true)
            .map_err(|e| RetrievalError::Rerank(e.to_string()))?;

        let seq_len = self.config.max_seq_len;
        let ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(seq_len)
            .map(|&id| id as i64)
            .collect();

        let mut padded_ids = vec![0i64; seq_len];
        let mut padded_mask = vec![0i64; seq_len];
        padded_ids[..ids.len()].copy_from_slice(&ids);
        for slot in padded_mask.iter_mut().take(ids.len()) {
            *slot = 1;
        }

        let input_ids = Array2::from_shape_vec((1, seq_len), padded_ids)
            .map_err(|e| RetrievalError::Rerank(e.to_string()))?;
        let attention = Array2::from_shape_vec((1, seq_len), padded_mask)
            .map_err(|e| RetrievalError::Rerank(e.to_string()))?;

        let outputs = self
            .session
            .run(
                ort::inputs![
                    "input_ids" => input_ids.view(),
                    "attention_mask" => attention.view(),
                ]
                .map_err(|e| RetrievalError::Model(e.to_string()))?,
            )
            .map_err(|e| RetrievalError::Model(e.to_string()))?;

        let logits = outputs
            .get("logits")
            .ok_or_else(|| RetrievalError::Model("missing logits output".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| RetrievalError::Model(e.to_string()))?;

        let flat: Vec<f64> = logits.view().iter().map(|&x| f64::from(x)).collect();
        Ok(relevance_from_logits(&flat))
    }

    #[cfg(not(feature = "onnx"))]
    fn score_pair(&self, query: &str, text: &str) -> Result<f64, RetrievalError> {
        Ok(OverlapScorer::score(query, text))
    }
}

/// Collapse classifier logits to a relevance probability.
///
/// Two-class heads get a max-subtracted softmax over the positive class,
/// single-logit heads go straight through the sigmoid.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn relevance_from_logits(logits: &[f64]) -> f64 {
    match logits.len() {
        0 => 0.0,
        1 => sigmoid(logits[0]),
        _ => {
            let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let exp_sum: f64 = logits.iter().map(|&x| (x - max).exp()).sum();
            (logits[1] - max).exp() / exp_sum
        }
    }
}

/// Model-free scorer based on character-bigram overlap.
///
/// Whitespace word overlap is useless for Chinese text, so overlap is
/// measured over the bigram sets of both strings (Jaccard).
pub struct OverlapScorer;

impl OverlapScorer {
    pub fn score(query: &str, text: &str) -> f64 {
        let q = Self::bigrams(query);
        let t = Self::bigrams(text);
        if q.is_empty() || t.is_empty() {
            return 0.0;
        }
        let overlap = q.intersection(&t).count();
        let union = q.union(&t).count();
        overlap as f64 / union as f64
    }

    fn bigrams(s: &str) -> std::collections::HashSet<(char, char)> {
        let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_prefers_the_matching_case() {
        let brake = OverlapScorer::score("低速刹车有异响", "低速刹车时有金属摩擦异响");
        let engine = OverlapScorer::score("低速刹车有异响", "发动机怠速异响");
        assert!(brake > engine);
    }

    #[test]
    fn overlap_of_disjoint_texts_is_zero() {
        assert_eq!(OverlapScorer::score("做饭洗衣服", "制动踏板变软"), 0.0);
    }

    #[test]
    fn relevance_from_logits_handles_all_head_shapes() {
        assert_eq!(relevance_from_logits(&[]), 0.0);
        assert!((relevance_from_logits(&[0.0]) - 0.5).abs() < 1e-12);
        let p = relevance_from_logits(&[-1.0, 3.0]);
        assert!(p > 0.9 && p <= 1.0);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn scores_stay_in_unit_interval_and_are_deterministic() {
        let encoder = CrossEncoder::new(RerankerConfig::default()).expect("encoder");
        let texts = vec![
            "低速刹车时有金属摩擦异响".to_string(),
            "发动机怠速异响".to_string(),
        ];
        let first = encoder.score("车子有异响", &texts).expect("score");
        let second = encoder.score("车子有异响", &texts).expect("score");
        assert_eq!(first, second);
        for s in first {
            assert!((0.0..=1.0).contains(&s));
        }
    }
}
