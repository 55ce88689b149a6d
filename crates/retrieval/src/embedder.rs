//! Text embeddings
//!
//! Encodes query and case texts into L2-normalized dense vectors for the
//! semantic retriever. The real model runs through ONNX behind the `onnx`
//! feature; without it a deterministic hashing encoder stands in, which keeps
//! the whole pipeline exercisable in tests.

use std::sync::Arc;

use once_cell::sync::OnceCell;

#[cfg(feature = "onnx")]
use ndarray::Array2;
#[cfg(feature = "onnx")]
use ort::{GraphOptimizationLevel, Session};
#[cfg(feature = "onnx")]
use tokenizers::Tokenizer;

use crate::RetrievalError;

/// Embedding configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Maximum sequence length
    pub max_seq_len: usize,
    /// Embedding dimension
    pub embedding_dim: usize,
    /// Batch size for bulk embedding
    pub batch_size: usize,
    /// ONNX model file
    pub model_path: String,
    /// Tokenizer file
    pub tokenizer_path: String,
    /// ONNX output tensor name; models disagree on what to call it
    pub output_name: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_seq_len: 512,
            embedding_dim: 512,
            batch_size: 32,
            model_path: "models/embedding/model.onnx".to_string(),
            tokenizer_path: "models/embedding/tokenizer.json".to_string(),
            output_name: "last_hidden_state".to_string(),
        }
    }
}

/// Text embedder. All outputs are unit-norm.
pub struct Embedder {
    #[cfg(feature = "onnx")]
    session: Session,
    #[cfg(feature = "onnx")]
    tokenizer: Tokenizer,
    config: EmbeddingConfig,
}

/// Process-wide encoder, loaded lazily on first use.
static ENCODER: OnceCell<Arc<Embedder>> = OnceCell::new();

/// Return the shared encoder, building it on first call. Concurrent first
/// use is serialized by the cell, so the model is never loaded twice.
pub fn global_encoder(config: EmbeddingConfig) -> Result<Arc<Embedder>, RetrievalError> {
    ENCODER
        .get_or_try_init(|| Embedder::new(config).map(Arc::new))
        .cloned()
}

impl Embedder {
    /// Create a new embedder
    #[cfg(feature = "onnx")]
    pub fn new(config: EmbeddingConfig) -> Result<Self, RetrievalError> {
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

    /// Create a new embedder (hashing fallback when ONNX disabled)
    #[cfg(not(feature = "onnx"))]
    pub fn new(config: EmbeddingConfig) -> Result<Self, RetrievalError> {
        Ok(Self { config })
    }

    /// Embed a single text
    pub fn encode_one(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vecs = self.encode(&[text])?;
        vecs.pop()
            .ok_or_else(|| RetrievalError::Embedding("empty batch result".to_string()))
    }

    /// Embed multiple texts
    #[cfg(feature = "onnx")]
    pub fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size) {
            all.extend(self.encode_batch(chunk)?);
        }
        Ok(all)
    }

    /// Embed multiple texts (hashing fallback when ONNX disabled)
    #[cfg(not(feature = "onnx"))]
    pub fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let hasher = HashEmbedder::new(self.config.embedding_dim);
        Ok(texts.iter().map(|t| hasher.embed(t)).collect())
    }

    #[cfg(feature = "onnx")]
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let batch_size = texts.len();
        let seq_len = self.config.max_seq_len;

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];
        let mut token_type_ids = vec![0i64; batch_size * seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            let len = ids.len().min(seq_len);
            let offset = i * seq_len;
            for j in 0..len {
                input_ids[offset + j] = ids[j] as i64;
                attention_mask[offset + j] = mask[j] as i64;
                token_type_ids[offset + j] = types[j] as i64;
            }
        }

        let input_ids = Array2::from_shape_vec((batch_size, seq_len), input_ids)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((batch_size, seq_len), attention_mask)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let token_type_ids = Array2::from_shape_vec((batch_size, seq_len), token_type_ids)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let outputs = self
            .session
            .run(
                ort::inputs![
                    "input_ids" => input_ids.view(),
                    "attention_mask" => attention_mask.view(),
                    "token_type_ids" => token_type_ids.view(),
                ]
                .map_err(|e| RetrievalError::Model(e.to_string()))?,
            )
            .map_err(|e| RetrievalError::Model(e.to_string()))?;

        let hidden = outputs
            .get(&self.config.output_name)
            .ok_or_else(|| {
                RetrievalError::Model(format!("missing output tensor: {}", self.config.output_name))
            })?
            .try_extract_tensor::<f32>()
            .map_err(|e| RetrievalError::Model(e.to_string()))?;
        let hidden = hidden.view();

        let dim = self.config.embedding_dim;
        let mut embeddings = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let tokens = encodings[i].get_ids().len().min(seq_len);
            let mut embedding = vec![0.0f32; dim];

            // Mean pooling over real tokens
            for j in 0..tokens {
                for k in 0..dim {
                    embedding[k] += hidden[[i, j, k]];
                }
            }
            for v in &mut embedding {
                *v /= tokens.max(1) as f32;
            }

            l2_normalize(&mut embedding);
            embeddings.push(embedding);
        }

        Ok(embeddings)
    }

    /// Get embedding dimension
    pub fn dim(&self) -> usize {
        self.config.embedding_dim
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Deterministic hashing embedder (no model required).
///
/// Accumulates character positions into buckets, giving overlapping texts
/// overlapping vectors. Good enough for tests and for running the pipeline
/// without model files.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for (i, ch) in text.chars().enumerate() {
            let idx = (ch as usize + i) % self.dim;
            v[idx] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedder_is_unit_norm() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("刹车发软 车身发飘");
        assert_eq!(v.len(), 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.embed("异响"), embedder.embed("异响"));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn encode_matches_config_dimension() {
        let embedder = Embedder::new(EmbeddingConfig {
            embedding_dim: 96,
            ..EmbeddingConfig::default()
        })
        .expect("embedder");
        let vecs = embedder.encode(&["a", "b"]).expect("encode");
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0].len(), 96);
    }
}
