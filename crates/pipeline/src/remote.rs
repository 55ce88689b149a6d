//! The remote-only match pipeline.
//!
//! Drives the external full-text + vector backend: lexical search, an
//! optional kNN pass over the stored vector field, fusion under the
//! caller-supplied semantic weight, and the same gray-zone routing and
//! closed-set adjudication as the local pipeline.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::warn;

use fault_match_config::FusionWeights;
use fault_match_core::{Candidate, DecisionMode, Error, Hints, Result};
use fault_match_llm::PickCandidate;
use fault_match_remote::{KnnQuery, RemoteSearch};
use fault_match_retrieval::{fuse, merge_by_id, normalize_query};

use crate::orchestrator::{MatchMetadata, MatchResponse, PipelineConfig};
use crate::router::{apply_llm_verdict, decide};
use crate::traits::{CandidatePicker, QueryEncoder};

/// Per-request options for the remote pipeline.
#[derive(Debug, Clone)]
pub struct RemoteMatchOptions {
    pub size: usize,
    pub use_decision: bool,
    pub use_semantic: bool,
    /// `None` uses the default weight
    pub semantic_weight: Option<f64>,
    pub vector_k: usize,
    pub use_llm: bool,
    pub llm_topn: usize,
}

impl Default for RemoteMatchOptions {
    fn default() -> Self {
        Self {
            size: 10,
            use_decision: true,
            use_semantic: true,
            semantic_weight: None,
            vector_k: 50,
            use_llm: false,
            llm_topn: 5,
        }
    }
}

const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.6;

/// Remote matching with gray-zone routing.
pub struct RemoteMatchPipeline {
    config: PipelineConfig,
    remote: Arc<RemoteSearch>,
    encoder: Option<Arc<dyn QueryEncoder>>,
    picker: Option<Arc<dyn CandidatePicker>>,
}

impl RemoteMatchPipeline {
    pub fn new(config: PipelineConfig, remote: Arc<RemoteSearch>) -> Self {
        Self {
            config,
            remote,
            encoder: None,
            picker: None,
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn QueryEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_picker(mut self, picker: Arc<dyn CandidatePicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn semantic_available(&self) -> bool {
        self.encoder.is_some()
    }

    pub async fn matching(
        &self,
        raw_query: &str,
        hints: Hints,
        options: &RemoteMatchOptions,
    ) -> Result<MatchResponse> {
        let query = normalize_query(raw_query);
        let semantic_weight = options
            .semantic_weight
            .unwrap_or(DEFAULT_SEMANTIC_WEIGHT)
            .clamp(0.0, 1.0);
        let vector_k = options.vector_k.max(1);

        let mut metadata = MatchMetadata {
            semantic_used: false,
            semantic_weight: 0.0,
            vector_k: 0,
            keyword_size: options.size,
            ..MatchMetadata::default()
        };
        if query.is_empty() {
            return Ok(no_match_response(query, "empty query", metadata));
        }

        // Lexical search is the backbone here; if it fails the remote
        // request has no usable signal at all.
        let lexical = timeout(
            self.config.source_timeout,
            self.remote.lexical(&query, &hints, options.size),
        )
        .await
        .map_err(|_| Error::Remote("lexical search timed out".to_string()))?
        .map_err(Error::from)?;

        let mut lists: Vec<Vec<Candidate>> = vec![lexical
            .hits
            .iter()
            .map(|hit| hit.to_candidate(false))
            .collect()];

        if options.use_semantic {
            if let Some(encoder) = &self.encoder {
                match self.run_knn(encoder, &query, vector_k, &hints).await {
                    Ok(hits) => {
                        metadata.semantic_used = true;
                        metadata.semantic_weight = semantic_weight;
                        metadata.vector_k = vector_k;
                        lists.push(hits);
                    }
                    Err(e) => {
                        warn!(error = %e, "remote kNN failed, keyword-only result");
                    }
                }
            }
        }

        let pool = merge_by_id(lists);
        if pool.is_empty() {
            return Ok(no_match_response(query, "no candidates", metadata));
        }

        let weights = remote_weights(semantic_weight);
        let mut ranked = fuse(
            pool,
            &weights,
            &hints,
            self.config.popularity_p95,
            usize::MAX,
        );

        let mut decision = options
            .use_decision
            .then(|| decide(&ranked, &self.config.thresholds));

        if let Some(base) = decision.take() {
            decision = Some(
                self.maybe_adjudicate(base, &query, &ranked, options, &mut metadata)
                    .await,
            );
        }

        let total = lexical.total.max(ranked.len() as u64);
        ranked.truncate(options.size);
        Ok(MatchResponse {
            query,
            total,
            top: ranked,
            decision,
            metadata,
        })
    }

    /// Invoke the picker on a gray decision when the caller asked for it.
    async fn maybe_adjudicate(
        &self,
        base: fault_match_core::Decision,
        query: &str,
        ranked: &[Candidate],
        options: &RemoteMatchOptions,
        metadata: &mut MatchMetadata,
    ) -> fault_match_core::Decision {
        if base.mode != DecisionMode::Gray || !options.use_llm {
            return base;
        }
        let Some(picker) = &self.picker else {
            return base;
        };

        let submitted = ranked.len().min(options.llm_topn.max(1));
        let picks: Vec<PickCandidate> = ranked[..submitted]
            .iter()
            .map(|c| PickCandidate {
                id: c.id.clone(),
                text: c.text.clone(),
                system: c.system.clone(),
                part: c.part.clone(),
            })
            .collect();

        metadata.llm_used = true;
        metadata.llm_candidate_count = submitted;

        let verdict = match timeout(self.config.llm_timeout, picker.pick(query, &picks)).await {
            Ok(verdict) => verdict,
            Err(_) => fault_match_core::LlmVerdict::unknown("llm timeout"),
        };
        apply_llm_verdict(base, verdict, ranked, submitted)
    }

    async fn run_knn(
        &self,
        encoder: &Arc<dyn QueryEncoder>,
        query: &str,
        vector_k: usize,
        hints: &Hints,
    ) -> Result<Vec<Candidate>> {
        let encoder = Arc::clone(encoder);
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || encoder.encode(&text))
            .await
            .map_err(|e| Error::Retrieval(format!("encode task failed: {e}")))??;

        let knn = KnnQuery {
            vector,
            k: vector_k,
        };
        let result = timeout(self.config.source_timeout, self.remote.knn(&knn, hints))
            .await
            .map_err(|_| Error::Remote("kNN search timed out".to_string()))?
            .map_err(Error::from)?;

        Ok(result.hits.iter().map(|hit| hit.to_candidate(true)).collect())
    }
}

/// Fusion weights for the remote pipeline: the caller splits the lexical /
/// semantic balance, popularity keeps a small fixed share, and the local
/// priors stay out (the backend already applied its filters).
fn remote_weights(semantic_weight: f64) -> FusionWeights {
    FusionWeights {
        rerank: 0.0,
        cosine: semantic_weight,
        bm25: 1.0 - semantic_weight,
        kg_prior: 0.0,
        popularity: 0.05,
    }
}

fn no_match_response(query: String, reason: &str, metadata: MatchMetadata) -> MatchResponse {
    MatchResponse {
        query,
        total: 0,
        top: Vec::new(),
        decision: Some(fault_match_core::Decision::no_match(reason)),
        metadata,
    }
}
