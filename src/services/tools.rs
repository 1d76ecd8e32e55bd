//! Tool Runtime - dispatches model-initiated tool calls against a session.
//!
//! Exactly three tools are exposed: `queryData`, `getMessageTypes` and
//! `getDataSchema`. Every result is a tagged JSON object carrying an `ok`
//! discriminator so the model can always tell an empty result from an
//! error. Malformed argument JSON becomes a tool error the model can
//! recover from.

use serde::Deserialize;
use serde_json::json;

use super::llm::ToolSpec;
use super::session_registry::ChatSession;

/// Rows forwarded to the model per query; keeps tool results bounded
const MAX_RESULT_ROWS: usize = 100;

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "queryData".to_string(),
            description: "Run a read-only SQL SELECT against the flight log tables. \
                          Use getDataSchema first to learn table and column names."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "A single SELECT statement"
                    }
                },
                "required": ["sql"]
            }),
        },
        ToolSpec {
            name: "getMessageTypes".to_string(),
            description: "List the telemetry message types ingested from this flight log."
                .to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "getDataSchema".to_string(),
            description: "Full schema dump: every message type with its table name and columns."
                .to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct QueryDataArgs {
    sql: String,
}

/// Per-turn dispatcher bound to one session
pub struct ToolRuntime<'a> {
    session: &'a ChatSession,
}

impl<'a> ToolRuntime<'a> {
    pub fn new(session: &'a ChatSession) -> Self {
        Self { session }
    }

    /// Execute one tool call and serialize its tagged result
    pub fn dispatch(&self, name: &str, raw_args: &str) -> serde_json::Value {
        match name {
            "queryData" => self.query_data(raw_args),
            "getMessageTypes" => self.message_types(),
            "getDataSchema" => self.data_schema(),
            other => tool_error(format!("unknown tool: {}", other)),
        }
    }

    fn query_data(&self, raw_args: &str) -> serde_json::Value {
        let args: QueryDataArgs = match serde_json::from_str(raw_args) {
            Ok(args) => args,
            Err(e) => return tool_error(format!("invalid tool arguments: {}", e)),
        };

        match self.session.store.query(&args.sql) {
            Ok(output) => {
                let total = output.rows.len();
                let rows: Vec<_> = output.rows.into_iter().take(MAX_RESULT_ROWS).collect();
                let mut result = json!({
                    "ok": true,
                    "columns": output.columns,
                    "rows": rows,
                    "rowCount": total,
                });
                if total > MAX_RESULT_ROWS {
                    result["truncated"] = json!(true);
                }
                result
            },
            Err(e) => tool_error(e.to_string()),
        }
    }

    fn message_types(&self) -> serde_json::Value {
        let types: Vec<&String> = self.session.schema.keys().collect();
        json!({ "ok": true, "messageTypes": types })
    }

    fn data_schema(&self) -> serde_json::Value {
        match serde_json::to_value(&self.session.schema) {
            Ok(schema) => json!({ "ok": true, "schema": schema }),
            Err(e) => tool_error(format!("schema serialization failed: {}", e)),
        }
    }
}

fn tool_error(message: impl Into<String>) -> serde_json::Value {
    json!({ "ok": false, "error": message.into() })
}
