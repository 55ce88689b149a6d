//! Application state
//!
//! Builds the retrievers, models, and pipelines once at startup and shares
//! them read-only across requests.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use fault_match_config::Settings;
use fault_match_core::{load_cases, Result};
use fault_match_llm::{LlmConfig, PickerOptions};
use fault_match_pipeline::{
    CandidatePicker, LlmPicker, LocalSemanticSource, MatchPipeline, PipelineConfig, QueryEncoder,
    RemoteMatchPipeline,
};
use fault_match_retrieval::{
    embedder::global_encoder, reranker::global_reranker, CachedEmbedder, EmbeddingConfig,
    HnswParams, KeywordRetriever, RerankerConfig, SemanticIndex,
};
use fault_match_remote::{RemoteSearch, RemoteSearchConfig};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub local: Arc<MatchPipeline>,
    pub remote: Option<Arc<RemoteMatchPipeline>>,
    pub remote_search: Option<Arc<RemoteSearch>>,
    pub semantic_available: bool,
}

impl AppState {
    /// Load the knowledge base, build (or reload) the index artifacts, and
    /// wire both pipelines.
    pub fn build(settings: Settings) -> Result<Self> {
        let cases = load_cases(&settings.data_file)?;
        info!(cases = cases.len(), file = %settings.data_file, "knowledge base loaded");

        let encoder = Arc::new(CachedEmbedder::with_default_capacity(global_encoder(
            embedding_config(&settings),
        )?));

        let keyword = KeywordRetriever::open(
            &cases,
            Path::new(&settings.data_file),
            Path::new(&settings.tfidf_cache_path),
        )?;

        let semantic = SemanticIndex::open(
            Path::new(&settings.hnsw_index_path),
            &cases,
            encoder.inner(),
            HnswParams::default(),
        )?;

        let reranker = global_reranker(reranker_config(&settings))?;

        let picker: Option<Arc<dyn CandidatePicker>> = if settings.llm_configured() {
            Some(Arc::new(LlmPicker {
                config: LlmConfig::from_settings(&settings),
                options: PickerOptions {
                    timeout: settings.llm_timeout(),
                    ..PickerOptions::default()
                },
            }))
        } else {
            info!("LLM picker not configured, gray decisions stay unadjudicated");
            None
        };

        let config = PipelineConfig::from(&settings);
        let mut local = MatchPipeline::new(config.clone(), cases)
            .with_keyword(Arc::new(keyword))
            .with_semantic(Arc::new(LocalSemanticSource {
                index: Arc::new(semantic),
                encoder: Arc::clone(&encoder),
            }))
            .with_reranker(reranker);
        if let Some(picker) = &picker {
            local = local.with_picker(Arc::clone(picker));
        }

        let (remote, remote_search) = if settings.remote_configured() {
            match RemoteSearch::new(RemoteSearchConfig::from_settings(&settings)) {
                Ok(search) => {
                    let search = Arc::new(search);
                    let mut pipeline = RemoteMatchPipeline::new(config, Arc::clone(&search))
                        .with_encoder(Arc::clone(&encoder) as Arc<dyn QueryEncoder>);
                    if let Some(picker) = &picker {
                        pipeline = pipeline.with_picker(Arc::clone(picker));
                    }
                    (Some(Arc::new(pipeline)), Some(search))
                }
                Err(e) => {
                    warn!(error = %e, "remote search unavailable");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            settings: Arc::new(settings),
            local: Arc::new(local),
            remote,
            remote_search,
            semantic_available: true,
        })
    }
}

/// The embedding model settings double as ONNX file locations: the model
/// path points at the exported `.onnx`, with `tokenizer.json` next to it.
fn embedding_config(settings: &Settings) -> EmbeddingConfig {
    EmbeddingConfig {
        model_path: settings.embedding_model.clone(),
        tokenizer_path: sibling_tokenizer(&settings.embedding_model),
        ..EmbeddingConfig::default()
    }
}

fn reranker_config(settings: &Settings) -> RerankerConfig {
    RerankerConfig {
        model_path: settings.reranker_model.clone(),
        tokenizer_path: sibling_tokenizer(&settings.reranker_model),
        ..RerankerConfig::default()
    }
}

fn sibling_tokenizer(model_path: &str) -> String {
    Path::new(model_path)
        .with_file_name("tokenizer.json")
        .to_string_lossy()
        .into_owned()
}
