//! LLM Client - HTTP client for OpenAI-compatible chat and embeddings APIs.
//!
//! The client is stateless: every call carries the full message sequence.
//! Transport failures retry with capped exponential backoff; rate limits
//! honor the provider's retry-after header.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::models::*;

pub struct LLMClient {
    http_client: Client,
    api_base: String,
    api_key: Option<String>,
    embed_model: String,
    timeout: Duration,
    max_retries: u32,
}

impl LLMClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        embed_model: impl Into<String>,
        timeout_seconds: u64,
        max_retries: u32,
    ) -> Result<Self, LLMError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(1)))
            .build()
            .map_err(|e| LLMError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: api_base.into(),
            api_key,
            embed_model: embed_model.into(),
            timeout: Duration::from_secs(timeout_seconds.max(1)),
            max_retries,
        })
    }

    fn api_key(&self) -> Result<&str, LLMError> {
        self.api_key.as_deref().ok_or(LLMError::MissingApiKey)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, LLMError> {
        let api_key = self.api_key()?;

        let response = self
            .http_client
            .post(self.endpoint(path))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout(self.timeout.as_secs())
                } else {
                    LLMError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30);
            return Err(LLMError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LLMError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))
    }

    /// Issue a request, retrying retryable failures with exponential backoff
    async fn post_with_retries(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, LLMError> {
        let mut attempt = 0;
        loop {
            match self.post_json(path, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = match &e {
                        LLMError::RateLimited(secs) => Duration::from_secs((*secs).min(30)),
                        _ => Duration::from_millis(500 * 2u64.pow(attempt)),
                    };
                    attempt += 1;
                    tracing::warn!(
                        "LLM call failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.max_retries,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn message_to_json(msg: &ChatMessage) -> serde_json::Value {
        let mut body = json!({ "role": msg.role.as_str() });
        if let Some(content) = &msg.content {
            body["content"] = json!(content);
        }
        if !msg.tool_calls.is_empty() {
            let calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments }
                    })
                })
                .collect();
            body["tool_calls"] = json!(calls);
        }
        if let Some(call_id) = &msg.tool_call_id {
            body["tool_call_id"] = json!(call_id);
        }
        body
    }

    fn tool_to_json(tool: &ToolSpec) -> serde_json::Value {
        json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters
            }
        })
    }

    fn parse_chat_response(body: serde_json::Value) -> Result<ChatOutcome, LLMError> {
        let message = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| LLMError::ParseError("no choices in response".to_string()))?;

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .filter(|s| !s.trim().is_empty());

        let mut tool_calls = Vec::new();
        if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array()) {
            for call in calls {
                let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let function = call.get("function");
                let name = function
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let arguments = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("{}");
                if name.is_empty() {
                    continue;
                }
                tool_calls.push(ToolCallRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                });
            }
        }

        Ok(ChatOutcome { text, tool_calls })
    }
}

#[async_trait]
impl ChatGateway for LLMClient {
    async fn chat(&self, request: ChatTurnRequest) -> Result<ChatOutcome, LLMError> {
        let messages: Vec<serde_json::Value> =
            request.messages.iter().map(Self::message_to_json).collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> =
                request.tools.iter().map(Self::tool_to_json).collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if request.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }

        tracing::debug!(
            model = %request.model,
            message_count = request.messages.len(),
            tools = request.tools.len(),
            "Calling chat completion API"
        );

        let response = self.post_with_retries("chat/completions", &body).await?;
        Self::parse_chat_response(response)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.embed_model,
            "input": texts,
        });

        tracing::debug!(inputs = texts.len(), "Calling embeddings API");

        let response = self.post_with_retries("embeddings", &body).await?;
        let data = response
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| LLMError::ParseError("no data in embeddings response".to_string()))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vector = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| LLMError::ParseError("missing embedding vector".to_string()))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            embeddings.push(vector);
        }

        if embeddings.len() != texts.len() {
            return Err(LLMError::ParseError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }
}
