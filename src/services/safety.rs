//! Safety Gate - the auxiliary classifiers guarding a turn's entry and exit.
//!
//! The pre-call detector screens user messages for prompt injection; the
//! post-call classifier decides whether the assistant's text is a
//! disciplined answer shape. Both run on the cheaper parser model with a
//! JSON response format. Classifier failures fail open with a warning so a
//! flaky parser model cannot take the whole pipeline down.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::llm::{ChatGateway, ChatMessage, ChatTurnRequest, LLMError};

const INJECTION_PROMPT: &str = include_str!("prompts/injection_check.md");
const CLASSIFIER_PROMPT: &str = include_str!("prompts/answer_classifier.md");

/// Fixed refusal emitted when the injection detector trips. The refused
/// user message is never appended to history.
pub const REFUSAL_TEXT: &str = "I can only help with questions about the uploaded flight log. \
Your last message looked like an attempt to change how I operate, so I did not process it. \
Please ask me about your flight data.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct InjectionVerdict {
    pub suspicious: bool,
    pub risk: RiskLevel,
    pub reason: String,
}

impl InjectionVerdict {
    fn safe(reason: impl Into<String>) -> Self {
        Self { suspicious: false, risk: RiskLevel::Low, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnswerCategory {
    Answer,
    Clarification,
    Reasoning,
    Vague,
}

impl AnswerCategory {
    /// Only ANSWER and CLARIFICATION are valid terminal states
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Answer | Self::Clarification)
    }
}

#[derive(Debug, Clone)]
pub struct AnswerVerdict {
    pub category: AnswerCategory,
    pub is_valid: bool,
    pub reason: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInjectionVerdict {
    #[serde(default)]
    classification: String,
    #[serde(default)]
    risk: Option<RiskLevel>,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnswerVerdict {
    category: AnswerCategory,
    #[serde(default)]
    is_valid: Option<bool>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    suggestion: Option<String>,
}

pub struct SafetyGate {
    gateway: Arc<dyn ChatGateway>,
    parser_model: String,
}

impl SafetyGate {
    pub fn new(gateway: Arc<dyn ChatGateway>, parser_model: impl Into<String>) -> Self {
        Self { gateway, parser_model: parser_model.into() }
    }

    /// Pre-call injection detector. Suspicious verdicts short-circuit the
    /// turn with [`REFUSAL_TEXT`].
    pub async fn screen_input(&self, message: &str) -> InjectionVerdict {
        let request = ChatTurnRequest::new(
            self.parser_model.clone(),
            vec![
                ChatMessage::system(INJECTION_PROMPT),
                ChatMessage::user(format!("User message to screen:\n\n{}", message)),
            ],
        )
        .with_temperature(0.0)
        .expect_json();

        match self.call_parser::<RawInjectionVerdict>(request).await {
            Ok(raw) => {
                let suspicious = raw.classification.eq_ignore_ascii_case("suspicious");
                InjectionVerdict {
                    suspicious,
                    risk: raw.risk.unwrap_or(if suspicious {
                        RiskLevel::Medium
                    } else {
                        RiskLevel::Low
                    }),
                    reason: raw.reason,
                }
            },
            Err(e) => {
                tracing::warn!("Injection screening failed, treating message as safe: {}", e);
                InjectionVerdict::safe("screening unavailable")
            },
        }
    }

    /// Post-call answer-shape classifier
    pub async fn classify_answer(&self, text: &str) -> AnswerVerdict {
        let request = ChatTurnRequest::new(
            self.parser_model.clone(),
            vec![
                ChatMessage::system(CLASSIFIER_PROMPT),
                ChatMessage::user(format!("Assistant reply to classify:\n\n{}", text)),
            ],
        )
        .with_temperature(0.0)
        .expect_json();

        match self.call_parser::<RawAnswerVerdict>(request).await {
            Ok(raw) => AnswerVerdict {
                category: raw.category,
                is_valid: raw.is_valid.unwrap_or(raw.category.is_terminal()),
                reason: raw.reason,
                suggestion: raw.suggestion,
            },
            Err(e) => {
                tracing::warn!("Answer classification failed, accepting reply as-is: {}", e);
                AnswerVerdict {
                    category: AnswerCategory::Answer,
                    is_valid: true,
                    reason: "classifier unavailable".to_string(),
                    suggestion: None,
                }
            },
        }
    }

    async fn call_parser<T: serde::de::DeserializeOwned>(
        &self,
        request: ChatTurnRequest,
    ) -> Result<T, LLMError> {
        let outcome = self.gateway.chat(request).await?;
        let text = outcome.text.ok_or(LLMError::EmptyResponse)?;
        parse_json_object(&text)
    }
}

/// Parse a JSON object out of classifier text, tolerating code fences and
/// surrounding prose
fn parse_json_object<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, LLMError> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }

    let start = text.find('{');
    let end = text.rfind('}');
    if let (Some(start), Some(end)) = (start, end)
        && start < end
    {
        return serde_json::from_str(&text[start..=end])
            .map_err(|e| LLMError::ParseError(format!("classifier output: {}", e)));
    }

    Err(LLMError::ParseError(format!(
        "classifier returned no JSON object: {}",
        text.chars().take(120).collect::<String>()
    )))
}
