//! LLM gateway data models: messages, tool declarations, outcomes, errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// LLM gateway errors
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("LLM API key not configured")]
    MissingApiKey,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("LLM returned neither text nor tool calls")]
    EmptyResponse,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LLMError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::ApiError(_))
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, possibly malformed; the runtime reports
    /// malformed arguments back as a tool error
    pub arguments: String,
}

/// Declaration of one tool offered to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One message of the conversation the gateway forwards verbatim.
/// The agent controller owns the sequence; the gateway is stateless.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls: calls, tool_call_id: None }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// One gateway round trip
#[derive(Debug, Clone)]
pub struct ChatTurnRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f64>,
    /// Ask the provider for a JSON object body (classifier calls)
    pub json_response: bool,
}

impl ChatTurnRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            json_response: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

/// What the model returned: final text, tool calls, or (exceptionally) neither
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatOutcome {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty() && self.text.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}

/// Typed boundary to the remote chat and embeddings provider.
///
/// The trait seam keeps the agent pipeline testable with a scripted
/// gateway; production wires in [`super::LLMClient`].
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, request: ChatTurnRequest) -> Result<ChatOutcome, LLMError>;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError>;
}
