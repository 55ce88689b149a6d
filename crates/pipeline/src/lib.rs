//! Request pipeline: retrieval fan-out, fusion, gray-zone routing, and
//! optional LLM adjudication.
//!
//! The orchestrator drives each request end-to-end:
//! normalize → concurrent retrieval → fuse → (rerank → re-fuse) → route →
//! (closed-set pick) → assemble response. Retrievers sit behind small traits
//! so the local TF-IDF/HNSW stack, the remote backend, and test stubs all
//! plug in the same way.

pub mod orchestrator;
pub mod remote;
pub mod router;
pub mod traits;

pub use orchestrator::{MatchOptions, MatchMetadata, MatchPipeline, MatchResponse, PipelineConfig};
pub use remote::{RemoteMatchOptions, RemoteMatchPipeline};
pub use router::{apply_llm_verdict, decide, Thresholds};
pub use traits::{
    CandidatePicker, KeywordSource, LlmPicker, LocalSemanticSource, QueryEncoder, RerankScorer,
    SemanticSource,
};
