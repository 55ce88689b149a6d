//! Seams between the orchestrator and its collaborators.
//!
//! Each retrieval signal sits behind a small trait so the local stack, the
//! remote backend, and test stubs plug into the same pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use fault_match_core::{LlmVerdict, Result};
use fault_match_llm::{closed_set_pick, LlmConfig, PickCandidate, PickerOptions};
use fault_match_retrieval::{CachedEmbedder, CrossEncoder, KeywordRetriever, SemanticIndex};

/// Lexical retrieval: `(case_id, raw_score)` ordered by descending score.
/// Implementations are CPU-bound and are called from the blocking pool.
pub trait KeywordSource: Send + Sync {
    fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>>;
}

impl KeywordSource for KeywordRetriever {
    fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>> {
        Ok(self.query(query, k))
    }
}

/// Semantic retrieval: `(case_id, cosine)` with cosine in `[-1, 1]`.
#[async_trait]
pub trait SemanticSource: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>>;
}

/// The local HNSW index paired with the shared query encoder.
pub struct LocalSemanticSource {
    pub index: Arc<SemanticIndex>,
    pub encoder: Arc<CachedEmbedder>,
}

#[async_trait]
impl SemanticSource for LocalSemanticSource {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>> {
        let encoder = Arc::clone(&self.encoder);
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || encoder.encode_one(&text))
            .await
            .map_err(|e| fault_match_core::Error::Retrieval(format!("encode task failed: {e}")))??;
        Ok(self.index.query(vector, k).await?)
    }
}

/// Cross-encoder scoring over `(query, text)` pairs, `[0, 1]` per text.
pub trait RerankScorer: Send + Sync {
    fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>>;
}

impl RerankScorer for CrossEncoder {
    fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>> {
        Ok(CrossEncoder::score(self, query, texts)?)
    }
}

/// Query encoding for the remote kNN clause.
pub trait QueryEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

impl QueryEncoder for CachedEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.encode_one(text)?)
    }
}

/// Closed-set adjudication. Implementations must never fail; every problem
/// is an `UNKNOWN` verdict.
#[async_trait]
pub trait CandidatePicker: Send + Sync {
    async fn pick(&self, query: &str, candidates: &[PickCandidate]) -> LlmVerdict;
}

/// The real picker bound to an endpoint.
pub struct LlmPicker {
    pub config: LlmConfig,
    pub options: PickerOptions,
}

#[async_trait]
impl CandidatePicker for LlmPicker {
    async fn pick(&self, query: &str, candidates: &[PickCandidate]) -> LlmVerdict {
        closed_set_pick(&self.config, query, candidates, &self.options).await
    }
}
