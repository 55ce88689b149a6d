//! Per-request candidate objects.
//!
//! A `Candidate` is created during retrieval fan-out, mutated by the fusion
//! engine, consumed by the router and response assembler, and dropped with
//! the request. Candidates are never shared between requests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::case::FaultCase;

/// Retrieval source that contributed to a candidate.
///
/// Modeled as a small enumerated set rather than owned source objects so the
/// candidate graph stays acyclic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Keyword,
    Semantic,
    Remote,
    Rerank,
}

/// Structured hints supplied with a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hints {
    pub system: Option<String>,
    pub part: Option<String>,
    pub vehicletype: Option<String>,
    pub faultcode: Option<String>,
}

impl Hints {
    pub fn is_empty(&self) -> bool {
        self.system.is_none()
            && self.part.is_none()
            && self.vehicletype.is_none()
            && self.faultcode.is_none()
    }
}

/// An in-flight match candidate.
///
/// Raw per-source scores are present only when that source contributed;
/// normalized scores are filled by the fusion engine and live in `[0, 1]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicletype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faultcode: Option<String>,
    pub popularity: f64,

    /// Raw source scores, request-local working state
    #[serde(skip)]
    pub bm25_raw: Option<f64>,
    #[serde(skip)]
    pub cosine_raw: Option<f64>,
    #[serde(skip)]
    pub rerank_raw: Option<f64>,

    /// Normalized scores in `[0, 1]`
    #[serde(rename = "bm25_score", skip_serializing_if = "Option::is_none")]
    pub bm25: Option<f64>,
    #[serde(rename = "cosine", skip_serializing_if = "Option::is_none")]
    pub cosine: Option<f64>,
    #[serde(rename = "rerank_score", skip_serializing_if = "Option::is_none")]
    pub rerank: Option<f64>,

    /// Structured-field agreement prior in `[0, 1]`
    pub kg_prior: f64,
    /// Popularity prior in `[0, 1]`
    pub popularity_norm: f64,

    pub final_score: f64,

    /// Sources that contributed this candidate
    pub sources: BTreeSet<Source>,

    /// Ordered human-readable reason tags
    pub why: Vec<String>,

    /// Highlight fragments returned by the remote backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<serde_json::Value>,
}

impl Candidate {
    /// Seed a candidate from a knowledge-base case.
    pub fn from_case(case: &FaultCase) -> Self {
        Self {
            id: case.id.clone(),
            text: case.text.clone(),
            system: case.system.clone(),
            part: case.part.clone(),
            tags: case.tags.clone(),
            vehicletype: case.vehicletype.clone(),
            faultcode: case.faultcode.clone(),
            popularity: case.popularity,
            ..Self::default()
        }
    }

    /// Record a raw keyword (TF-IDF / BM25-style) score.
    pub fn with_bm25_raw(mut self, raw: f64) -> Self {
        self.bm25_raw = Some(raw);
        self.sources.insert(Source::Keyword);
        self
    }

    /// Record a raw cosine similarity.
    pub fn with_cosine_raw(mut self, raw: f64) -> Self {
        self.cosine_raw = Some(raw);
        self.sources.insert(Source::Semantic);
        self
    }

    /// Merge another sighting of the same case from a different source.
    /// First-seen raw scores win; source sets union.
    pub fn absorb(&mut self, other: Candidate) {
        debug_assert_eq!(self.id, other.id);
        if self.bm25_raw.is_none() {
            self.bm25_raw = other.bm25_raw;
        }
        if self.cosine_raw.is_none() {
            self.cosine_raw = other.cosine_raw;
        }
        if self.rerank_raw.is_none() {
            self.rerank_raw = other.rerank_raw;
        }
        if self.highlight.is_none() {
            self.highlight = other.highlight;
        }
        self.sources.extend(other.sources);
    }
}
