//! Semantic retrieval over an HNSW approximate nearest-neighbor index.
//!
//! Case texts are encoded once to unit vectors and inserted into an
//! `hnsw_rs` graph. The graph and its data are persisted as sidecar files
//! next to the knowledge base together with a JSON metadata file carrying
//! the insertion-slot → case-id table and the vector dimension. A missing,
//! corrupt, or mismatched cache triggers a rebuild at startup; afterwards
//! the index is read-only and shared across requests.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{info, warn};

use fault_match_core::FaultCase;

use crate::embedder::Embedder;
use crate::RetrievalError;

/// Basename for the persisted graph/data files.
const BASENAME: &str = "cases";

/// Metadata sidecar filename.
const META_FILENAME: &str = "cases.hnsw.meta.json";

/// HNSW tuning parameters, sized for dozens of thousands of points.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub max_nb_connection: usize,
    pub max_layer: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            max_layer: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Metadata written alongside the index so dimension or corpus changes are
/// detected and trigger a rebuild.
#[derive(Debug, Serialize, Deserialize)]
struct IndexMetadata {
    dimension: usize,
    /// Insertion slot -> case id
    ids: Vec<String>,
}

/// Newtype wrapper so the HNSW graph can cross threads.
///
/// The `'static` lifetime is safe: graphs built via `Hnsw::new()` own their
/// data, and on load the `HnswIo` is leaked (`Box::leak`) so the borrowed
/// data lives for the process lifetime.
struct HnswInner {
    hnsw: Hnsw<'static, f32, DistCosine>,
}

// SAFETY: hnsw_rs::Hnsw<'static, f32, DistCosine> uses Arc-based internal
// storage and is safe to share across threads.
unsafe impl Send for HnswInner {}
unsafe impl Sync for HnswInner {}

/// Read-only ANN index over the knowledge base.
pub struct SemanticIndex {
    params: HnswParams,
    dimension: usize,
    ids: Arc<Vec<String>>,
    inner: Arc<HnswInner>,
}

impl SemanticIndex {
    /// Load the persisted index when it matches the current corpus and
    /// encoder, otherwise encode every case text and rebuild.
    pub fn open(
        index_dir: &Path,
        cases: &[FaultCase],
        embedder: &Embedder,
        params: HnswParams,
    ) -> Result<Self, RetrievalError> {
        if let Some(index) = Self::try_load(index_dir, cases, embedder.dim(), params) {
            info!(points = index.len(), dir = %index_dir.display(), "HNSW index loaded from disk");
            return Ok(index);
        }
        let index = Self::build(index_dir, cases, embedder, params)?;
        info!(points = index.len(), dir = %index_dir.display(), "HNSW index rebuilt");
        Ok(index)
    }

    fn try_load(
        index_dir: &Path,
        cases: &[FaultCase],
        dimension: usize,
        params: HnswParams,
    ) -> Option<Self> {
        let graph_file = index_dir.join(format!("{BASENAME}.hnsw.graph"));
        let data_file = index_dir.join(format!("{BASENAME}.hnsw.data"));
        let meta_file = index_dir.join(META_FILENAME);
        if !graph_file.exists() || !data_file.exists() || !meta_file.exists() {
            return None;
        }

        let meta: IndexMetadata = serde_json::from_str(&fs::read_to_string(&meta_file).ok()?)
            .map_err(|e| warn!(error = %e, "unreadable HNSW metadata, rebuilding"))
            .ok()?;
        if meta.dimension != dimension {
            warn!(
                stored = meta.dimension,
                expected = dimension,
                "HNSW dimension mismatch, rebuilding"
            );
            return None;
        }
        if meta.ids.len() != cases.len() {
            info!(
                stored = meta.ids.len(),
                current = cases.len(),
                "HNSW point count does not match knowledge base, rebuilding"
            );
            return None;
        }

        // hnsw_rs can panic on corrupt files instead of returning an error
        let dir = index_dir.to_path_buf();
        let loaded = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let io = Box::leak(Box::new(HnswIo::new(&dir, BASENAME)));
            let result: Result<Hnsw<'static, f32, DistCosine>, _> =
                io.load_hnsw_with_dist(DistCosine);
            result
        }));

        match loaded {
            Ok(Ok(hnsw)) => Some(Self {
                params,
                dimension,
                ids: Arc::new(meta.ids),
                inner: Arc::new(HnswInner { hnsw }),
            }),
            Ok(Err(e)) => {
                warn!(error = %e, "HNSW load failed, rebuilding");
                None
            }
            Err(_) => {
                warn!("HNSW load panicked (corrupt index files), rebuilding");
                let _ = fs::remove_file(&graph_file);
                let _ = fs::remove_file(&data_file);
                None
            }
        }
    }

    fn build(
        index_dir: &Path,
        cases: &[FaultCase],
        embedder: &Embedder,
        params: HnswParams,
    ) -> Result<Self, RetrievalError> {
        if cases.is_empty() {
            return Err(RetrievalError::Index("no cases to index".to_string()));
        }

        let texts: Vec<&str> = cases.iter().map(|c| c.text.as_str()).collect();
        let vectors = embedder.encode(&texts)?;
        let dimension = embedder.dim();

        let hnsw = Hnsw::<f32, DistCosine>::new(
            params.max_nb_connection,
            cases.len().max(1),
            params.max_layer,
            params.ef_construction,
            DistCosine,
        );
        for (slot, vector) in vectors.iter().enumerate() {
            hnsw.insert_slice((vector, slot));
        }

        let ids: Vec<String> = cases.iter().map(|c| c.id.clone()).collect();
        if let Err(e) = Self::persist(index_dir, &hnsw, dimension, &ids) {
            warn!(dir = %index_dir.display(), error = %e, "failed to persist HNSW index");
        }

        Ok(Self {
            params,
            dimension,
            ids: Arc::new(ids),
            inner: Arc::new(HnswInner { hnsw }),
        })
    }

    fn persist(
        index_dir: &Path,
        hnsw: &Hnsw<'static, f32, DistCosine>,
        dimension: usize,
        ids: &[String],
    ) -> Result<(), RetrievalError> {
        fs::create_dir_all(index_dir)?;
        let dir = index_dir.to_path_buf();
        hnsw.file_dump(&dir, BASENAME)
            .map_err(|e| RetrievalError::Index(format!("HNSW file_dump failed: {e}")))?;
        let meta = IndexMetadata {
            dimension,
            ids: ids.to_vec(),
        };
        let meta_path = index_dir.join(META_FILENAME);
        fs::write(meta_path, serde_json::to_string(&meta).map_err(|e| {
            RetrievalError::Index(format!("HNSW metadata serialization failed: {e}"))
        })?)?;
        Ok(())
    }

    /// Search for the `k` nearest cases.
    ///
    /// Returns `(case_id, cosine_similarity)` pairs ordered by descending
    /// similarity, cosine in `[-1, 1]`. The CPU-bound graph walk runs on the
    /// blocking pool.
    pub async fn query(&self, q_vec: Vec<f32>, k: usize) -> Result<Vec<(String, f64)>, RetrievalError> {
        if q_vec.len() != self.dimension {
            return Err(RetrievalError::Search(format!(
                "query dimension {} does not match index dimension {}",
                q_vec.len(),
                self.dimension
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let inner = Arc::clone(&self.inner);
        let ids = Arc::clone(&self.ids);
        let k = k.min(ids.len());
        let ef = self.params.ef_search.max(k * 2);

        task::spawn_blocking(move || {
            let neighbours = inner.hnsw.search(&q_vec, k, ef);
            neighbours
                .into_iter()
                .map(|n| (ids[n.d_id].clone(), f64::from(1.0 - n.distance)))
                .collect()
        })
        .await
        .map_err(|e| RetrievalError::Search(format!("HNSW search task failed: {e}")))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
