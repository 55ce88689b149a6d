//! Optional calibration profile overlay.
//!
//! Operators periodically re-fit thresholds and fusion weights offline and
//! drop the result next to the data files:
//!
//! ```json
//! {
//!     "pass_threshold": 0.87,
//!     "gray_low_threshold": 0.66,
//!     "fusion_weights": {
//!         "rerank": 0.5,
//!         "cosine": 0.25,
//!         "bm25": 0.15,
//!         "kg_prior": 0.05,
//!         "popularity": 0.05
//!     }
//! }
//! ```
//!
//! Missing keys fall back to the configured values, unknown keys are ignored,
//! and an absent or malformed file yields an empty profile (with a warning)
//! rather than failing startup.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// Per-signal weight overrides; any subset may be present.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WeightOverrides {
    pub rerank: Option<f64>,
    pub cosine: Option<f64>,
    pub bm25: Option<f64>,
    pub kg_prior: Option<f64>,
    pub popularity: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalibrationProfile {
    pub pass_threshold: Option<f64>,
    pub gray_low_threshold: Option<f64>,
    #[serde(default)]
    pub fusion_weights: WeightOverrides,
}

impl CalibrationProfile {
    /// Load a profile from `path`. Empty path, missing file, or malformed
    /// JSON all yield the empty profile.
    pub fn load(path: &str) -> Self {
        if path.is_empty() {
            return Self::default();
        }
        let path = Path::new(path);
        if !path.is_file() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed calibration profile, ignoring");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable calibration profile, ignoring");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pass_threshold.is_none()
            && self.gray_low_threshold.is_none()
            && self.fusion_weights.rerank.is_none()
            && self.fusion_weights.cosine.is_none()
            && self.fusion_weights.bm25.is_none()
            && self.fusion_weights.kg_prior.is_none()
            && self.fusion_weights.popularity.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_empty_profile() {
        let p = CalibrationProfile::load("/nonexistent/calibration.json");
        assert!(p.is_empty());
    }

    #[test]
    fn partial_profile_with_unknown_keys() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            f,
            r#"{{"pass_threshold": 0.9, "fusion_weights": {{"bm25": 0.3}}, "fitted_at": "2025-06-01"}}"#
        )
        .expect("write");

        let p = CalibrationProfile::load(f.path().to_str().unwrap());
        assert_eq!(p.pass_threshold, Some(0.9));
        assert_eq!(p.gray_low_threshold, None);
        assert_eq!(p.fusion_weights.bm25, Some(0.3));
        assert_eq!(p.fusion_weights.rerank, None);
    }

    #[test]
    fn malformed_file_is_empty_profile() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        write!(f, "{{not json").expect("write");
        let p = CalibrationProfile::load(f.path().to_str().unwrap());
        assert!(p.is_empty());
    }
}
