//! Error types for the fault-case retrieval service

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the retrieval service
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or malformed query; surfaced as 4xx, no retrieval performed
    #[error("Input error: {0}")]
    Input(String),

    /// Retriever failure (timeout, corrupt cache, index unavailable)
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Remote search backend failure
    #[error("Remote search error: {0}")]
    Remote(String),

    /// Cross-encoder failure; callers skip rerank and continue
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// LLM picker failure; callers degrade to the base gray decision
    #[error("LLM error: {0}")]
    Llm(String),

    /// Every retrieval source failed for one request
    #[error("All retrieval sources failed: {0}")]
    AllSourcesFailed(String),

    /// Invalid or inconsistent settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Knowledge-base file could not be parsed
    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable reason code for error responses.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::Input(_) => "invalid_input",
            Error::Retrieval(_) => "retriever_failed",
            Error::Remote(_) => "remote_search_failed",
            Error::Rerank(_) => "rerank_failed",
            Error::Llm(_) => "llm_failed",
            Error::AllSourcesFailed(_) => "all_sources_failed",
            Error::Config(_) => "invalid_config",
            Error::Data(_) => "bad_knowledge_base",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// True for errors the caller should see as a client-side (4xx) problem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Input(_))
    }

    /// Create an input error
    pub fn input<S: Into<String>>(msg: S) -> Self {
        Error::Input(msg.into())
    }

    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Retrieval(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Retrieval(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(Error::input("empty query").reason_code(), "invalid_input");
        assert_eq!(
            Error::AllSourcesFailed("timeouts".into()).reason_code(),
            "all_sources_failed"
        );
    }

    #[test]
    fn only_input_errors_are_client_errors() {
        assert!(Error::input("bad").is_client_error());
        assert!(!Error::Retrieval("down".into()).is_client_error());
        assert!(!Error::AllSourcesFailed("down".into()).is_client_error());
    }
}
