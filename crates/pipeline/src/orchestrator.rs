//! The local match pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::warn;

use fault_match_config::{FusionWeights, Settings};
use fault_match_core::{Candidate, Decision, Error, FaultCase, Hints, Result, Source};
use fault_match_llm::PickCandidate;
use fault_match_retrieval::{fuse, merge_by_id, normalize_query};

use crate::router::{apply_llm_verdict, decide, Thresholds};
use crate::traits::{CandidatePicker, KeywordSource, RerankScorer, SemanticSource};

/// Knobs shared by every request.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub thresholds: Thresholds,
    pub weights: FusionWeights,
    pub popularity_p95: f64,
    /// Merged candidates handed to the reranker
    pub k_rerank: usize,
    pub source_timeout: Duration,
    pub rerank_timeout: Duration,
    pub llm_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            weights: FusionWeights::default(),
            popularity_p95: 147.0,
            k_rerank: 20,
            source_timeout: Duration::from_millis(1500),
            rerank_timeout: Duration::from_millis(500),
            llm_timeout: Duration::from_millis(20_000),
        }
    }
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            thresholds: Thresholds::from(settings),
            weights: settings.fusion_weights(),
            popularity_p95: settings.popularity_p95,
            k_rerank: 20,
            source_timeout: settings.source_timeout(),
            rerank_timeout: settings.rerank_timeout(),
            llm_timeout: settings.llm_timeout(),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    pub topk_vec: usize,
    pub topk_kw: usize,
    pub topn_return: usize,
    pub use_llm: bool,
    pub llm_topn: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            topk_vec: 50,
            topk_kw: 50,
            topn_return: 3,
            use_llm: false,
            llm_topn: 5,
        }
    }
}

/// Request-level bookkeeping returned to the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchMetadata {
    pub semantic_used: bool,
    pub semantic_weight: f64,
    pub vector_k: usize,
    pub keyword_size: usize,
    pub llm_used: bool,
    pub llm_candidate_count: usize,
}

/// The assembled response.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub query: String,
    pub total: u64,
    pub top: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub metadata: MatchMetadata,
}

impl MatchResponse {
    fn no_match(query: String, reason: &str, metadata: MatchMetadata) -> Self {
        Self {
            query,
            total: 0,
            top: Vec::new(),
            decision: Some(Decision::no_match(reason)),
            metadata,
        }
    }
}

/// Drives a request through the local retrievers.
pub struct MatchPipeline {
    config: PipelineConfig,
    cases: Arc<HashMap<String, FaultCase>>,
    keyword: Option<Arc<dyn KeywordSource>>,
    semantic: Option<Arc<dyn SemanticSource>>,
    reranker: Option<Arc<dyn RerankScorer>>,
    picker: Option<Arc<dyn CandidatePicker>>,
}

impl MatchPipeline {
    pub fn new(config: PipelineConfig, cases: Vec<FaultCase>) -> Self {
        let cases = cases.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            config,
            cases: Arc::new(cases),
            keyword: None,
            semantic: None,
            reranker: None,
            picker: None,
        }
    }

    pub fn with_keyword(mut self, source: Arc<dyn KeywordSource>) -> Self {
        self.keyword = Some(source);
        self
    }

    pub fn with_semantic(mut self, source: Arc<dyn SemanticSource>) -> Self {
        self.semantic = Some(source);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankScorer>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_picker(mut self, picker: Arc<dyn CandidatePicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    /// Names of the configured retrieval sources (health reporting).
    pub fn sources(&self) -> Vec<&'static str> {
        let mut sources = Vec::new();
        if self.keyword.is_some() {
            sources.push("local_tfidf");
        }
        if self.semantic.is_some() {
            sources.push("local_hnsw");
        }
        sources
    }

    /// Run one request end-to-end.
    pub async fn matching(
        &self,
        raw_query: &str,
        hints: Hints,
        options: &MatchOptions,
    ) -> Result<MatchResponse> {
        let query = normalize_query(raw_query);
        let metadata = MatchMetadata {
            semantic_used: self.semantic.is_some(),
            semantic_weight: self.config.weights.normalized().cosine,
            vector_k: options.topk_vec,
            keyword_size: options.topk_kw,
            ..MatchMetadata::default()
        };
        if query.is_empty() {
            return Ok(MatchResponse::no_match(query, "empty query", metadata));
        }

        // Fan out to both local retrievers under the per-source timeout.
        // join! keeps result positions fixed, so retriever completion order
        // never affects the fused pool.
        let keyword_fut = self.run_keyword(&query, options.topk_kw);
        let semantic_fut = self.run_semantic(&query, options.topk_vec);
        let (keyword_out, semantic_out) = tokio::join!(keyword_fut, semantic_fut);

        let mut metadata = metadata;
        let mut configured = 0usize;
        let mut failed = 0usize;
        let mut errors: Vec<String> = Vec::new();
        let mut lists: Vec<Vec<Candidate>> = Vec::new();

        if let Some(out) = keyword_out {
            configured += 1;
            match out {
                Ok(hits) => lists.push(self.seed_candidates(hits, Source::Keyword)),
                Err(e) => {
                    warn!(error = %e, "keyword retrieval failed, source omitted");
                    failed += 1;
                    errors.push(e.to_string());
                }
            }
        }
        if let Some(out) = semantic_out {
            configured += 1;
            match out {
                Ok(hits) => lists.push(self.seed_candidates(hits, Source::Semantic)),
                Err(e) => {
                    warn!(error = %e, "semantic retrieval failed, source omitted");
                    failed += 1;
                    errors.push(e.to_string());
                    metadata.semantic_used = false;
                }
            }
        }

        if configured == 0 {
            return Err(Error::Config("no retrieval sources configured".to_string()));
        }
        if failed == configured {
            return Err(Error::AllSourcesFailed(errors.join("; ")));
        }

        let pool = merge_by_id(lists);
        if pool.is_empty() {
            return Ok(MatchResponse::no_match(query, "no candidates", metadata));
        }

        // Fuse everything first; rerank only the head of the ranking.
        let mut ranked = fuse(
            pool,
            &self.config.weights,
            &hints,
            self.config.popularity_p95,
            usize::MAX,
        );
        ranked = self.apply_rerank(&query, ranked, &hints).await;

        let mut decision = decide(&ranked, &self.config.thresholds);

        if decision.mode == fault_match_core::DecisionMode::Gray && options.use_llm {
            if let Some(picker) = &self.picker {
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

                let verdict = match timeout(self.config.llm_timeout, picker.pick(&query, &picks))
                    .await
                {
                    Ok(verdict) => verdict,
                    Err(_) => fault_match_core::LlmVerdict::unknown("llm timeout"),
                };
                decision = apply_llm_verdict(decision, verdict, &ranked, submitted);
            }
        }

        let total = ranked.len() as u64;
        ranked.truncate(options.topn_return);
        Ok(MatchResponse {
            query,
            total,
            top: ranked,
            decision: Some(decision),
            metadata,
        })
    }

    async fn run_keyword(&self, query: &str, k: usize) -> Option<Result<Vec<(String, f64)>>> {
        let source = Arc::clone(self.keyword.as_ref()?);
        let query = query.to_string();
        let handle = tokio::task::spawn_blocking(move || source.search(&query, k));
        Some(match timeout(self.config.source_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Retrieval(format!("keyword task failed: {join}"))),
            Err(_) => Err(Error::Retrieval("keyword retrieval timed out".to_string())),
        })
    }

    async fn run_semantic(&self, query: &str, k: usize) -> Option<Result<Vec<(String, f64)>>> {
        let source = Arc::clone(self.semantic.as_ref()?);
        let query = query.to_string();
        Some(
            match timeout(self.config.source_timeout, async move {
                source.search(&query, k).await
            })
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Retrieval("semantic retrieval timed out".to_string())),
            },
        )
    }

    fn seed_candidates(&self, hits: Vec<(String, f64)>, source: Source) -> Vec<Candidate> {
        hits.into_iter()
            .filter_map(|(id, raw)| {
                let Some(case) = self.cases.get(&id) else {
                    warn!(id, "retriever returned an id missing from the knowledge base");
                    return None;
                };
                let candidate = Candidate::from_case(case);
                Some(match source {
                    Source::Keyword => candidate.with_bm25_raw(raw),
                    Source::Semantic => candidate.with_cosine_raw(raw),
                    _ => candidate,
                })
            })
            .collect()
    }

    /// Rerank the current head of the ranking and re-fuse. Any failure or
    /// timeout skips the step; fusion then re-weights without rerank.
    async fn apply_rerank(
        &self,
        query: &str,
        ranked: Vec<Candidate>,
        hints: &Hints,
    ) -> Vec<Candidate> {
        let Some(reranker) = &self.reranker else {
            return ranked;
        };
        if ranked.is_empty() {
            return ranked;
        }

        let k = ranked.len().min(self.config.k_rerank);
        let texts: Vec<String> = ranked[..k].iter().map(|c| c.text.clone()).collect();
        let scorer = Arc::clone(reranker);
        let query_owned = query.to_string();

        let handle =
            tokio::task::spawn_blocking(move || scorer.score(&query_owned, &texts));
        let scores = match timeout(self.config.rerank_timeout, handle).await {
            Ok(Ok(Ok(scores))) if scores.len() == k => scores,
            Ok(Ok(Ok(_))) => {
                warn!("reranker returned a mismatched score count, skipping");
                return ranked;
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "rerank failed, skipping");
                return ranked;
            }
            Ok(Err(join)) => {
                warn!(error = %join, "rerank task failed, skipping");
                return ranked;
            }
            Err(_) => {
                warn!("rerank timed out, skipping");
                return ranked;
            }
        };

        let mut pool = ranked;
        for (candidate, score) in pool[..k].iter_mut().zip(scores) {
            candidate.rerank_raw = Some(score);
            candidate.sources.insert(Source::Rerank);
        }
        fuse(
            pool,
            &self.config.weights,
            hints,
            self.config.popularity_p95,
            usize::MAX,
        )
    }
}
