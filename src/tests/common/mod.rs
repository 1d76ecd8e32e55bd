// Common test utilities and helpers

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::services::llm::{
    ChatGateway, ChatOutcome, ChatTurnRequest, LLMError, ToolCallRequest,
};

/// Sample parsed log: an ATT time series over three time keys, a GPS[0]
/// series with a sparse Alt field, one static MSG message, and sibling
/// collections that must be skipped.
pub fn sample_log() -> serde_json::Value {
    serde_json::json!({
        "ATT": {
            "time_boot_ms": {"0": 1000, "1": 2000, "2": 3000},
            "Roll": {"0": 1.5, "1": -0.75, "2": 0.25},
            "Pitch": {"0": 0.1, "1": 0.2, "2": 0.3}
        },
        "GPS[0]": {
            "time_boot_ms": {"0": 1000, "1": 2000, "2": 3000, "3": 4000},
            "Alt": {"0": 120.5, "1": 348.0, "3": 1448.0},
            "Spd": {"0": 0.0, "1": 12.5, "2": 14.0, "3": 9.75},
            "NSats": {"0": 9, "1": 10, "2": 10, "3": 11}
        },
        "MSG": {
            "Message": "ArduCopter V4.3.6"
        },
        "params": { "values": { "RTL_ALT": 3000 } },
        "events": [],
        "flightModeChanges": [[1000, "STABILIZE"]],
        "file": "raw log bytes",
        "logType": "bin"
    })
}

/// Letter-frequency embedding; deterministic and cheap, good enough to
/// exercise cosine ranking
pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; 26];
    for byte in text.bytes() {
        if byte.is_ascii_alphabetic() {
            vector[((byte | 32) - b'a') as usize] += 1.0;
        }
    }
    vector
}

/// Scripted [`ChatGateway`]: main-model outcomes and parser-model JSON
/// replies are popped from separate queues. With an empty parser queue the
/// screening call reports safe and the classifier reports ANSWER, so tests
/// only script what they assert on.
pub struct ScriptedGateway {
    chat_script: Mutex<VecDeque<ChatOutcome>>,
    parser_script: Mutex<VecDeque<String>>,
    pub chat_calls: AtomicU32,
    pub parser_calls: AtomicU32,
    pub embed_calls: AtomicU32,
    pub chat_delay: Option<Duration>,
    pub requests: Mutex<Vec<ChatTurnRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            chat_script: Mutex::new(VecDeque::new()),
            parser_script: Mutex::new(VecDeque::new()),
            chat_calls: AtomicU32::new(0),
            parser_calls: AtomicU32::new(0),
            embed_calls: AtomicU32::new(0),
            chat_delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chat_delay(mut self, delay: Duration) -> Self {
        self.chat_delay = Some(delay);
        self
    }

    pub fn push_text(&self, text: &str) {
        self.chat_script
            .lock()
            .expect("chat script lock")
            .push_back(ChatOutcome { text: Some(text.to_string()), tool_calls: Vec::new() });
    }

    pub fn push_empty(&self) {
        self.chat_script
            .lock()
            .expect("chat script lock")
            .push_back(ChatOutcome::default());
    }

    pub fn push_tool_call(&self, id: &str, name: &str, arguments: &str) {
        self.chat_script.lock().expect("chat script lock").push_back(ChatOutcome {
            text: None,
            tool_calls: vec![ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        });
    }

    pub fn push_parser_json(&self, json: &str) {
        self.parser_script
            .lock()
            .expect("parser script lock")
            .push_back(json.to_string());
    }

    pub fn chat_call_count(&self) -> u32 {
        self.chat_calls.load(Ordering::Relaxed)
    }

    pub fn embed_call_count(&self) -> u32 {
        self.embed_calls.load(Ordering::Relaxed)
    }

    fn default_parser_reply(request: &ChatTurnRequest) -> String {
        let system = request.messages.first().and_then(|m| m.content.clone()).unwrap_or_default();
        if system.contains("screen") {
            r#"{"classification": "safe", "risk": "LOW", "reason": "benign"}"#.to_string()
        } else {
            r#"{"category": "ANSWER", "isValid": true, "reason": "default", "suggestion": null}"#
                .to_string()
        }
    }
}

#[async_trait]
impl ChatGateway for ScriptedGateway {
    async fn chat(&self, request: ChatTurnRequest) -> Result<ChatOutcome, LLMError> {
        if let Some(delay) = self.chat_delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().expect("requests lock").push(request.clone());

        if request.json_response {
            self.parser_calls.fetch_add(1, Ordering::Relaxed);
            let reply = self
                .parser_script
                .lock()
                .expect("parser script lock")
                .pop_front()
                .unwrap_or_else(|| Self::default_parser_reply(&request));
            return Ok(ChatOutcome { text: Some(reply), tool_calls: Vec::new() });
        }

        self.chat_calls.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .chat_script
            .lock()
            .expect("chat script lock")
            .pop_front()
            .unwrap_or_else(|| {
                panic!("chat script exhausted after {} calls", self.chat_call_count())
            });
        Ok(outcome)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        self.embed_calls.fetch_add(1, Ordering::Relaxed);
        Ok(texts.iter().map(|t| mock_embedding(t)).collect())
    }
}
