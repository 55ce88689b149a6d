//! HTTP surface for the fault-case retrieval service.

pub mod http;
pub mod state;

pub use http::create_router;
pub use state::AppState;
