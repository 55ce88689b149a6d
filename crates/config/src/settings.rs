//! Main settings module

use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{CalibrationProfile, FusionWeights};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Process-wide application settings.
///
/// Field names are flat so each maps 1:1 onto an upper-cased environment
/// variable (`pass_threshold` <- `PASS_THRESHOLD`, and so on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// OpenAI-compatible endpoint base URL for the closed-set picker
    #[serde(default)]
    pub openai_api_base: String,

    #[serde(default)]
    pub openai_api_key: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Score at or above which the top match is returned directly
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,

    /// Lower edge of the gray band
    #[serde(default = "default_gray_low_threshold")]
    pub gray_low_threshold: f64,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_reranker_model")]
    pub reranker_model: String,

    /// JSONL knowledge base
    #[serde(default = "default_data_file")]
    pub data_file: String,

    /// Directory holding the persisted HNSW graph/data/meta files
    #[serde(default = "default_hnsw_index_path")]
    pub hnsw_index_path: String,

    #[serde(default = "default_tfidf_cache_path")]
    pub tfidf_cache_path: String,

    /// Optional calibration profile JSON; empty disables the overlay
    #[serde(default)]
    pub score_calibration_path: String,

    // FUSION_<SOURCE>_WEIGHT overrides. `None` means "not overridden".
    #[serde(default)]
    pub fusion_rerank_weight: Option<f64>,
    #[serde(default)]
    pub fusion_cosine_weight: Option<f64>,
    #[serde(default)]
    pub fusion_bm25_weight: Option<f64>,
    #[serde(default)]
    pub fusion_kg_prior_weight: Option<f64>,
    #[serde(default)]
    pub fusion_popularity_weight: Option<f64>,

    /// Popularity value treated as the saturation point of the log prior
    #[serde(default = "default_popularity_p95")]
    pub popularity_p95: f64,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Remote full-text + vector backend; empty disables remote search
    #[serde(default)]
    pub opensearch_url: String,

    #[serde(default = "default_opensearch_index")]
    pub opensearch_index: String,

    #[serde(default)]
    pub opensearch_username: String,

    #[serde(default)]
    pub opensearch_password: String,

    /// Dense vector field stored in the remote index
    #[serde(default = "default_vector_field")]
    pub opensearch_vector_field: String,

    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    #[serde(default = "default_rerank_timeout_ms")]
    pub rerank_timeout_ms: u64,

    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_pass_threshold() -> f64 {
    0.84
}
fn default_gray_low_threshold() -> f64 {
    0.65
}
fn default_embedding_model() -> String {
    "BAAI/bge-small-zh-v1.5".to_string()
}
fn default_reranker_model() -> String {
    "BAAI/bge-reranker-base".to_string()
}
fn default_data_file() -> String {
    "data/phenomena_sample.jsonl".to_string()
}
fn default_hnsw_index_path() -> String {
    "data/hnsw".to_string()
}
fn default_tfidf_cache_path() -> String {
    "data/tfidf.bin".to_string()
}
// ln(1 + 147) is just shy of 5.0, the divisor the first calibration round
// was fitted against.
fn default_popularity_p95() -> f64 {
    147.0
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_opensearch_index() -> String {
    "fault_cases".to_string()
}
fn default_vector_field() -> String {
    "text_vector".to_string()
}
fn default_source_timeout_ms() -> u64 {
    1500
}
fn default_rerank_timeout_ms() -> u64 {
    500
}
fn default_llm_timeout_ms() -> u64 {
    20_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_base: String::new(),
            openai_api_key: String::new(),
            openai_model: default_openai_model(),
            pass_threshold: default_pass_threshold(),
            gray_low_threshold: default_gray_low_threshold(),
            embedding_model: default_embedding_model(),
            reranker_model: default_reranker_model(),
            data_file: default_data_file(),
            hnsw_index_path: default_hnsw_index_path(),
            tfidf_cache_path: default_tfidf_cache_path(),
            score_calibration_path: String::new(),
            fusion_rerank_weight: None,
            fusion_cosine_weight: None,
            fusion_bm25_weight: None,
            fusion_kg_prior_weight: None,
            fusion_popularity_weight: None,
            popularity_p95: default_popularity_p95(),
            host: default_host(),
            port: default_port(),
            opensearch_url: String::new(),
            opensearch_index: default_opensearch_index(),
            opensearch_username: String::new(),
            opensearch_password: String::new(),
            opensearch_vector_field: default_vector_field(),
            source_timeout_ms: default_source_timeout_ms(),
            rerank_timeout_ms: default_rerank_timeout_ms(),
            llm_timeout_ms: default_llm_timeout_ms(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Load settings from the environment, overlay the calibration profile,
    /// and validate.
    ///
    /// Priority (highest to lowest): environment variables, calibration
    /// profile JSON, built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?;
        let mut settings: Settings = config.try_deserialize()?;

        let profile = CalibrationProfile::load(&settings.score_calibration_path);
        if !profile.is_empty() {
            info!(path = %settings.score_calibration_path, "applying calibration profile");
            settings.apply_profile(&profile);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Overlay a calibration profile. Environment variables win over the
    /// profile, the profile wins over defaults.
    pub fn apply_profile(&mut self, profile: &CalibrationProfile) {
        if std::env::var("PASS_THRESHOLD").is_err() {
            if let Some(v) = profile.pass_threshold {
                self.pass_threshold = v;
            }
        }
        if std::env::var("GRAY_LOW_THRESHOLD").is_err() {
            if let Some(v) = profile.gray_low_threshold {
                self.gray_low_threshold = v;
            }
        }
        let w = &profile.fusion_weights;
        self.fusion_rerank_weight = self.fusion_rerank_weight.or(w.rerank);
        self.fusion_cosine_weight = self.fusion_cosine_weight.or(w.cosine);
        self.fusion_bm25_weight = self.fusion_bm25_weight.or(w.bm25);
        self.fusion_kg_prior_weight = self.fusion_kg_prior_weight.or(w.kg_prior);
        self.fusion_popularity_weight = self.fusion_popularity_weight.or(w.popularity);
    }

    /// Effective fusion weights: defaults overlaid with overrides, then
    /// re-normalized to sum to 1.
    pub fn fusion_weights(&self) -> FusionWeights {
        let defaults = FusionWeights::default();
        FusionWeights {
            rerank: self.fusion_rerank_weight.unwrap_or(defaults.rerank),
            cosine: self.fusion_cosine_weight.unwrap_or(defaults.cosine),
            bm25: self.fusion_bm25_weight.unwrap_or(defaults.bm25),
            kg_prior: self.fusion_kg_prior_weight.unwrap_or(defaults.kg_prior),
            popularity: self.fusion_popularity_weight.unwrap_or(defaults.popularity),
        }
        .normalized()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("pass_threshold", self.pass_threshold),
            ("gray_low_threshold", self.gray_low_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if self.gray_low_threshold > self.pass_threshold {
            return Err(ConfigError::InvalidValue {
                field: "gray_low_threshold".to_string(),
                message: "gray_low_threshold must not exceed pass_threshold".to_string(),
            });
        }
        if self.popularity_p95 <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "popularity_p95".to_string(),
                message: "must be positive".to_string(),
            });
        }
        for (field, value) in [
            ("source_timeout_ms", self.source_timeout_ms),
            ("rerank_timeout_ms", self.rerank_timeout_ms),
            ("llm_timeout_ms", self.llm_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    /// True when the LLM picker has enough configuration to run.
    pub fn llm_configured(&self) -> bool {
        !self.openai_api_base.is_empty()
            && !self.openai_api_key.is_empty()
            && !self.openai_model.is_empty()
    }

    /// True when the remote search backend is configured.
    pub fn remote_configured(&self) -> bool {
        !self.opensearch_url.is_empty()
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }
}
