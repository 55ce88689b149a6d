//! Remote full-text + vector search adapter.
//!
//! Talks to an OpenSearch-compatible backend over HTTP: a weighted
//! multi-field lexical query with fuzziness, optional structured filters,
//! and an optional kNN clause over the stored dense vector field. Every
//! request runs under a bounded timeout and surfaces transport errors to the
//! caller instead of blocking or swallowing them.

mod client;
mod query;

pub use client::{KnnQuery, RemoteHit, RemoteSearch, RemoteSearchConfig, RemoteSearchResult};

use thiserror::Error;

/// Remote search errors
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Parse(String),
}

impl From<RemoteError> for fault_match_core::Error {
    fn from(err: RemoteError) -> Self {
        fault_match_core::Error::Remote(err.to_string())
    }
}
