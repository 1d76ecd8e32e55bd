//! Data model for parsed flight logs and the tables derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Column type inferred from the first observed non-null sample of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Real,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Text => "text",
        }
    }

    /// SQL storage type for table creation
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self { name: name.into(), column_type }
    }
}

/// Schema of one derived table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

/// Message type -> derived table schema, ordered for deterministic dumps
pub type LogSchema = BTreeMap<String, TableSchema>;

/// One successfully ingested message type
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestedTable {
    pub message_type: String,
    pub table: String,
    pub rows: usize,
    pub columns: usize,
}

/// A message type whose ingestion failed; the rest of the log still loads
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestFailure {
    pub message_type: String,
    pub error: String,
}

/// Summary of one log ingestion, returned with the session id
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub tables: Vec<IngestedTable>,
    pub skipped: Vec<String>,
    pub failures: Vec<IngestFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One entry of a session's bounded conversation history
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: TurnRole::User, text: text.into(), timestamp: Utc::now() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, text: text.into(), timestamp: Utc::now() }
    }
}
