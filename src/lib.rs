//! Aerolog Library
//!
//! Conversational analysis layer for UAV flight logs: log ingestion into an
//! in-memory tabular store, retrieval-augmented documentation, and a
//! tool-calling agent pipeline with numeric self-validation and safety
//! gating.

use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{AgentController, DocIndex, SessionRegistry};
pub use utils::{ApiError, ApiResult};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All singletons are wrapped in Arc for cheap cloning and thread safety; the
/// composition root in `main.rs` wires the capabilities each service consumes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    pub registry: Arc<SessionRegistry>,
    pub doc_index: Arc<DocIndex>,
    pub agent: Arc<AgentController>,
}
