//! Closed-set LLM adjudication.
//!
//! When the gray-zone router cannot settle a match on scores alone, the
//! picker submits a bounded candidate list to an OpenAI-compatible chat
//! endpoint and asks for exactly one of the supplied ids, or `UNKNOWN`.
//! The model is treated as untrusted: anything outside the candidate set,
//! malformed output, transport failures, and timeouts all degrade to an
//! `UNKNOWN` verdict instead of an error.

mod picker;
mod prompt;

pub use picker::{closed_set_pick, LlmConfig, PickCandidate, PickerOptions};
pub use prompt::{Message, Role};
