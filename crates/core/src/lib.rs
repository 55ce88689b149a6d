//! Core types for the fault-case retrieval service
//!
//! This crate provides foundational types used across all other crates:
//! - Fault case records and the knowledge-base loader
//! - Per-request candidate objects
//! - Routing decisions
//! - Error types

pub mod candidate;
pub mod case;
pub mod decision;
pub mod error;

pub use candidate::{Candidate, Hints, Source};
pub use case::{load_cases, FaultCase};
pub use decision::{Alternative, Decision, DecisionMode, LlmVerdict};
pub use error::{Error, Result};
