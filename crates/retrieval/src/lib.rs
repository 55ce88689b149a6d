//! Local retrieval for the fault-case knowledge base
//!
//! Features:
//! - Query normalization (abbreviations, misspellings, width folding)
//! - Char n-gram TF-IDF keyword retrieval with a persisted model cache
//! - HNSW approximate nearest-neighbor semantic retrieval
//! - Cross-encoder reranking
//! - Score calibration and weighted multi-source fusion

pub mod cache;
pub mod calibration;
pub mod embedder;
pub mod fusion;
pub mod keyword;
pub mod normalize;
pub mod reranker;
pub mod semantic;

pub use cache::{CacheStats, CachedEmbedder};
pub use calibration::{compute_stats, logistic_from_stats, sigmoid, ScoreStats};
pub use embedder::{Embedder, EmbeddingConfig};
pub use fusion::{fuse, merge_by_id};
pub use keyword::KeywordRetriever;
pub use normalize::normalize_query;
pub use reranker::{CrossEncoder, RerankerConfig};
pub use semantic::{HnswParams, SemanticIndex};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Rerank error: {0}")]
    Rerank(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RetrievalError> for fault_match_core::Error {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Rerank(msg) => fault_match_core::Error::Rerank(msg),
            other => fault_match_core::Error::Retrieval(other.to_string()),
        }
    }
}
