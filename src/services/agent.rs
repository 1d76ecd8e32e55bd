//! Agent Controller - the per-turn orchestration loop.
//!
//! One call to [`AgentController::run_turn`] drives a full turn: injection
//! screening, prompt composition from docs + schema + history, the bounded
//! tool loop, numeric self-validation with corrective retries, and answer
//! shape classification. Execution within a turn is strictly sequential;
//! parallel tool calls returned by the model run in the order given.

use std::sync::Arc;
use std::time::Duration;

use super::doc_index::{DocIndex, DocSearchHit};
use super::llm::{ChatGateway, ChatMessage, ChatTurnRequest, LLMError};
use super::safety::{AnswerCategory, AnswerVerdict, REFUSAL_TEXT, SafetyGate};
use super::session_registry::ChatSession;
use super::tools::{ToolRuntime, tool_specs};
use super::validator::{QueryValidator, ValidationSummary};
use crate::models::TurnRole;

const SYSTEM_PROMPT: &str = include_str!("prompts/agent_system.md");

/// Emitted when the tool-hop budget runs out mid-analysis
const TOOL_BUDGET_TEXT: &str = "I was not able to finish analyzing this question within the \
allotted number of data queries. Please narrow the question (for example to a specific message \
type or time range) and ask again.";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Turn deadline of {0}s exceeded")]
    Deadline(u64),

    #[error(transparent)]
    Gateway(#[from] LLMError),
}

/// Correction and hop budgets for one turn
#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub max_tool_hops: u32,
    pub max_answer_retries: u32,
    pub max_query_retries: u32,
    pub turn_deadline: Duration,
}

impl From<&crate::config::AgentConfig> for AgentLimits {
    fn from(cfg: &crate::config::AgentConfig) -> Self {
        Self {
            max_tool_hops: cfg.max_tool_hops,
            max_answer_retries: cfg.max_answer_retries,
            max_query_retries: cfg.max_query_retries,
            turn_deadline: Duration::from_secs(cfg.turn_deadline_seconds),
        }
    }
}

/// Everything a finished turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub thinking: Vec<String>,
    pub relevant_docs: Vec<DocSearchHit>,
    pub validation: Option<ValidationSummary>,
    pub category: Option<AnswerCategory>,
    /// Set when correction budgets ran out and the reply shipped anyway
    pub best_effort: bool,
    pub refused: bool,
    pub llm_round_trips: u32,
}

struct TurnState {
    thinking: Vec<String>,
    relevant_docs: Vec<DocSearchHit>,
    validation: Option<ValidationSummary>,
    llm_round_trips: u32,
}

pub struct AgentController {
    gateway: Arc<dyn ChatGateway>,
    safety: SafetyGate,
    doc_index: Arc<DocIndex>,
    chat_model: String,
    limits: AgentLimits,
}

impl AgentController {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        safety: SafetyGate,
        doc_index: Arc<DocIndex>,
        chat_model: impl Into<String>,
        limits: AgentLimits,
    ) -> Self {
        Self { gateway, safety, doc_index, chat_model: chat_model.into(), limits }
    }

    /// Run one user turn to a terminal outcome.
    ///
    /// The final (user, assistant) pair is appended to history exactly once,
    /// after the loop settles; corrected text replaces the original. Refused
    /// turns append nothing. On deadline expiry no partial history is
    /// written.
    pub async fn run_turn(
        &self,
        session: &ChatSession,
        message: &str,
    ) -> Result<TurnOutcome, AgentError> {
        let verdict = self.safety.screen_input(message).await;
        if verdict.suspicious {
            tracing::warn!(
                session_id = %session.id,
                risk = ?verdict.risk,
                "Refusing suspicious message: {}",
                verdict.reason
            );
            return Ok(TurnOutcome {
                response: REFUSAL_TEXT.to_string(),
                thinking: vec![format!("Input screening: suspicious ({})", verdict.reason)],
                relevant_docs: Vec::new(),
                validation: None,
                category: None,
                best_effort: false,
                refused: true,
                llm_round_trips: 0,
            });
        }

        let deadline = self.limits.turn_deadline;
        let outcome = tokio::time::timeout(deadline, self.drive(session, message))
            .await
            .map_err(|_| AgentError::Deadline(deadline.as_secs()))??;

        if let Some(summary) = &outcome.validation {
            session.record_validation(summary.clone());
        }
        session.append_exchange(message, &outcome.response);

        Ok(outcome)
    }

    /// The LLM/tool loop, free of deadline and history concerns
    async fn drive(&self, session: &ChatSession, message: &str) -> Result<TurnOutcome, AgentError> {
        let mut state = TurnState {
            thinking: Vec::new(),
            relevant_docs: self.doc_index.search(message).await,
            validation: None,
            llm_round_trips: 0,
        };
        state
            .thinking
            .push(format!("Retrieved {} documentation chunks", state.relevant_docs.len()));

        let mut messages = self.compose_prompt(session, message, &state.relevant_docs);
        let specs = tool_specs();
        let runtime = ToolRuntime::new(session);

        let mut tool_hops: u32 = 0;
        let mut query_corrections: u32 = 0;
        let mut answer_corrections: u32 = 0;
        let mut empty_retry_used = false;

        loop {
            let request = ChatTurnRequest::new(self.chat_model.clone(), messages.clone())
                .with_tools(specs.clone());
            let outcome = self.gateway.chat(request).await?;
            state.llm_round_trips += 1;

            if outcome.is_empty() {
                if empty_retry_used {
                    return Err(LLMError::EmptyResponse.into());
                }
                empty_retry_used = true;
                state
                    .thinking
                    .push("Model returned neither text nor tool calls, retrying once".to_string());
                continue;
            }

            if !outcome.tool_calls.is_empty() {
                if tool_hops >= self.limits.max_tool_hops {
                    tracing::warn!(
                        session_id = %session.id,
                        "Tool-hop budget of {} exhausted, aborting turn",
                        self.limits.max_tool_hops
                    );
                    state.thinking.push(format!(
                        "Tool-hop budget of {} exhausted",
                        self.limits.max_tool_hops
                    ));
                    return Ok(self.finish(state, TOOL_BUDGET_TEXT.to_string(), None, true));
                }
                tool_hops += 1;

                messages.push(ChatMessage::assistant_tool_calls(outcome.tool_calls.clone()));
                for call in &outcome.tool_calls {
                    let result = runtime.dispatch(&call.name, &call.arguments);
                    state.thinking.push(describe_tool_result(&call.name, &result));
                    messages.push(ChatMessage::tool(call.id.clone(), result.to_string()));
                }
                continue;
            }

            let text = outcome.text.unwrap_or_default();

            let summary = QueryValidator::validate(&text, &session.store);
            if summary.has_discrepancies() && query_corrections < self.limits.max_query_retries {
                query_corrections += 1;
                state.thinking.push(format!(
                    "Validator flagged {} of {} cited queries, requesting correction",
                    summary.queries_with_discrepancies, summary.total_queries
                ));
                messages.push(ChatMessage::assistant(text.clone()));
                messages.push(ChatMessage::user(query_correction_prompt(&text, &summary)));
                state.validation = Some(summary);
                continue;
            }
            state.validation = Some(summary);

            let verdict = self.safety.classify_answer(&text).await;
            state
                .thinking
                .push(format!("Answer classified as {:?}", verdict.category));

            if verdict.category.is_terminal() {
                return Ok(self.finish(state, text, Some(verdict.category), false));
            }

            if answer_corrections < self.limits.max_answer_retries {
                answer_corrections += 1;
                state.thinking.push(format!(
                    "Requesting reshaped reply (attempt {} of {})",
                    answer_corrections, self.limits.max_answer_retries
                ));
                messages.push(ChatMessage::assistant(text.clone()));
                messages.push(ChatMessage::user(shape_correction_prompt(&text, &verdict)));
                continue;
            }

            tracing::warn!(
                session_id = %session.id,
                category = ?verdict.category,
                "Answer-shape budget exhausted, emitting best effort"
            );
            return Ok(self.finish(state, text, Some(verdict.category), true));
        }
    }

    fn finish(
        &self,
        state: TurnState,
        response: String,
        category: Option<AnswerCategory>,
        best_effort: bool,
    ) -> TurnOutcome {
        TurnOutcome {
            response,
            thinking: state.thinking,
            relevant_docs: state.relevant_docs,
            validation: state.validation,
            category,
            best_effort,
            refused: false,
            llm_round_trips: state.llm_round_trips,
        }
    }

    /// System prompt + schema + retrieved docs, then the trailing history
    /// window, then the new user message
    fn compose_prompt(
        &self,
        session: &ChatSession,
        message: &str,
        docs: &[DocSearchHit],
    ) -> Vec<ChatMessage> {
        let schema_json = serde_json::to_string_pretty(&session.schema)
            .unwrap_or_else(|_| "{}".to_string());

        let docs_block = if docs.is_empty() {
            "(no documentation retrieved)".to_string()
        } else {
            docs.iter()
                .map(|hit| format!("- {}", hit.content.replace('\n', "\n  ")))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let system = format!(
            "{}\n\n## Data schema\n\n```json\n{}\n```\n\n## Relevant documentation\n\n{}",
            SYSTEM_PROMPT, schema_json, docs_block
        );

        let history = session.history_snapshot();
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system));
        for turn in history {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(turn.text),
                TurnRole::Assistant => ChatMessage::assistant(turn.text),
            });
        }
        messages.push(ChatMessage::user(message));
        messages
    }
}

fn describe_tool_result(name: &str, result: &serde_json::Value) -> String {
    let ok = result.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
    if !ok {
        let error = result
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return format!("Tool {} failed: {}", name, error);
    }
    match name {
        "queryData" => {
            let rows = result.get("rowCount").and_then(|v| v.as_u64()).unwrap_or(0);
            format!("Tool queryData returned {} rows", rows)
        },
        "getMessageTypes" => {
            let count = result
                .get("messageTypes")
                .and_then(|v| v.as_array())
                .map_or(0, |a| a.len());
            format!("Tool getMessageTypes listed {} types", count)
        },
        _ => format!("Tool {} completed", name),
    }
}

fn quote_lines(text: &str) -> String {
    text.lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn query_correction_prompt(original: &str, summary: &ValidationSummary) -> String {
    let mut findings = String::new();
    for record in &summary.validations {
        for d in &record.discrepancies {
            findings.push_str(&format!(
                "- `{}` actually returns {}, not the claimed {}\n",
                record.sql, d.actual, d.claimed
            ));
        }
    }

    format!(
        "Your previous reply quoted numbers that do not match the data:\n\n{}\n\n\
         Verified results:\n{}\n\
         Re-run the cited queries with the queryData tool (getMessageTypes and \
         getDataSchema are also still available) and reply again in the required \
         ANSWER/DATA SOURCE shape, quoting only values the queries actually return.",
        quote_lines(original),
        findings
    )
}

fn shape_correction_prompt(original: &str, verdict: &AnswerVerdict) -> String {
    let suggestion = verdict
        .suggestion
        .as_deref()
        .unwrap_or("State concrete values from the data, or ask a specific clarifying question.");

    format!(
        "Your previous reply was classified as {:?}: {}\n\n{}\n\n{}\n\n\
         The queryData, getMessageTypes and getDataSchema tools are still available. \
         Reply again in exactly one of the two required shapes \
         (ANSWER:/DATA SOURCE: or CLARIFICATION:/REASON:).",
        verdict.category,
        verdict.reason,
        quote_lines(original),
        suggestion
    )
}
