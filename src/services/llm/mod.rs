//! LLM Gateway - typed client for the remote chat and embeddings provider.

pub mod client;
pub mod models;

pub use client::LLMClient;
pub use models::{
    ChatGateway, ChatMessage, ChatOutcome, ChatRole, ChatTurnRequest, LLMError, ToolCallRequest,
    ToolSpec,
};
