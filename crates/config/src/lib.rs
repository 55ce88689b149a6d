//! Process-wide settings for the fault-case retrieval service.
//!
//! Settings are loaded once at startup from the environment (flat keys, so
//! `PASS_THRESHOLD`, `OPENAI_API_BASE`, `FUSION_BM25_WEIGHT`, ... map directly
//! onto fields) plus an optional calibration profile JSON, and are immutable
//! afterwards.

mod calibration_profile;
mod settings;
mod weights;

pub use calibration_profile::{CalibrationProfile, WeightOverrides};
pub use settings::{ConfigError, Settings};
pub use weights::FusionWeights;
