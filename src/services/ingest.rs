//! Log Ingester - schema inference and table materialization.
//!
//! Consumes an already-parsed telemetry log (message type -> fields) and
//! loads one table per message type into the session's tabular store.
//! Message shape is discriminated by the presence of `time_boot_ms`:
//! time-series fields are maps from a stringified ordinal to a scalar,
//! static messages hold a single scalar per field.

use serde_json::Value;
use std::collections::HashMap;

use super::store::{Cell, StoreError, TabularStore};
use crate::models::{
    ColumnInfo, ColumnType, IngestFailure, IngestReport, IngestedTable, LogSchema, TableSchema,
};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Malformed log: {0}")]
    MalformedLog(String),

    #[error("Message type {0} has an unsupported shape")]
    UnsupportedShape(String),

    #[error("Message type {msg_type} has a non-ordinal time key '{key}'")]
    BadTimeKey { msg_type: String, key: String },

    #[error("Message type {0} has no ingestible fields")]
    NoFields(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Message types deliberately excluded from ingestion: raw file content,
/// untyped geofence definitions, parameter dumps with inconsistent row
/// shape, and the sibling collections that are not telemetry streams.
/// This list is part of the contract.
pub const SKIPPED_MESSAGE_TYPES: &[&str] = &[
    "file",
    "logType",
    "fences",
    "params",
    "trajectories",
    "events",
    "flightModeChanges",
    "mission",
    "units",
    "multipliers",
    "format",
];

/// Derive the table name for a message type: lowercase, non-alphanumeric
/// folded to `_`, bracket indices flattened (`GPS[0]` -> `gps_0_data`).
pub fn table_name_for(msg_type: &str) -> String {
    let mut folded = String::with_capacity(msg_type.len());
    let mut last_was_sep = true;
    for c in msg_type.chars() {
        if c.is_ascii_alphanumeric() {
            folded.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            folded.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = folded.trim_end_matches('_');
    format!("{}_data", trimmed)
}

/// Materialized column before it is loaded: name, inferred type, cells
struct FieldArray {
    name: String,
    column_type: ColumnType,
    cells: Vec<Cell>,
}

pub struct LogIngester;

impl LogIngester {
    /// Ingest every message type of the log into `store`.
    ///
    /// Per-type failures are collected in the report; other types still
    /// load. Returns the derived schema alongside the report.
    pub fn ingest(log: &Value, store: &TabularStore) -> Result<(LogSchema, IngestReport), IngestError> {
        let entries = log
            .as_object()
            .ok_or_else(|| IngestError::MalformedLog("log body must be a JSON object".to_string()))?;

        let mut schema = LogSchema::new();
        let mut report = IngestReport::default();

        for (msg_type, payload) in entries {
            if SKIPPED_MESSAGE_TYPES.contains(&msg_type.as_str()) {
                report.skipped.push(msg_type.clone());
                continue;
            }

            match Self::ingest_message_type(msg_type, payload, store) {
                Ok((table_schema, rows)) => {
                    report.tables.push(IngestedTable {
                        message_type: msg_type.clone(),
                        table: table_schema.table.clone(),
                        rows,
                        columns: table_schema.columns.len(),
                    });
                    schema.insert(msg_type.clone(), table_schema);
                },
                Err(e) => {
                    tracing::warn!("Ingestion of {} failed: {}", msg_type, e);
                    report.failures.push(IngestFailure {
                        message_type: msg_type.clone(),
                        error: e.to_string(),
                    });
                },
            }
        }

        tracing::info!(
            "Ingested {} tables ({} skipped, {} failed)",
            report.tables.len(),
            report.skipped.len(),
            report.failures.len()
        );

        Ok((schema, report))
    }

    fn ingest_message_type(
        msg_type: &str,
        payload: &Value,
        store: &TabularStore,
    ) -> Result<(TableSchema, usize), IngestError> {
        let fields = payload
            .as_object()
            .ok_or_else(|| IngestError::UnsupportedShape(msg_type.to_string()))?;

        let arrays = if fields.contains_key("time_boot_ms") {
            Self::materialize_time_series(msg_type, fields)?
        } else {
            Self::materialize_static(msg_type, fields)?
        };

        let arrays = Self::reconcile(msg_type, arrays);
        if arrays.is_empty() {
            return Err(IngestError::NoFields(msg_type.to_string()));
        }

        let table = table_name_for(msg_type);
        let columns: Vec<ColumnInfo> = arrays
            .iter()
            .map(|a| ColumnInfo::new(a.name.clone(), a.column_type))
            .collect();
        let row_count = arrays[0].cells.len();

        let mut rows = Vec::with_capacity(row_count);
        for i in 0..row_count {
            rows.push(arrays.iter().map(|a| a.cells[i].clone()).collect());
        }

        let time_series = columns.iter().any(|c| c.name == "time_boot_ms");
        store.create_table(&table, &columns, time_series)?;
        store.bulk_insert(&table, &columns, &rows)?;

        Ok((TableSchema { table, columns }, row_count))
    }

    /// Project every field onto the canonical row index derived from the
    /// distinct `time_boot_ms` keys; absent entries become null, not zero.
    fn materialize_time_series(
        msg_type: &str,
        fields: &serde_json::Map<String, Value>,
    ) -> Result<Vec<FieldArray>, IngestError> {
        let time_map = fields
            .get("time_boot_ms")
            .and_then(Value::as_object)
            .ok_or_else(|| IngestError::UnsupportedShape(msg_type.to_string()))?;

        let mut ordinals: Vec<(u64, &String)> = Vec::with_capacity(time_map.len());
        for key in time_map.keys() {
            let ordinal = key.parse::<u64>().map_err(|_| IngestError::BadTimeKey {
                msg_type: msg_type.to_string(),
                key: key.clone(),
            })?;
            ordinals.push((ordinal, key));
        }
        ordinals.sort_unstable_by_key(|(n, _)| *n);

        let mut arrays = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let samples: Vec<Option<&Value>> = match value {
                Value::Object(map) => ordinals.iter().map(|(_, key)| map.get(*key)).collect(),
                // Scalar field inside a time-series message: materialize as a
                // single sample and let reconciliation decide its fate
                scalar => vec![Some(scalar)],
            };
            if let Some(array) = Self::to_field_array(name, &samples) {
                arrays.push(array);
            }
        }

        Ok(arrays)
    }

    /// One row; each field holds a single scalar
    fn materialize_static(
        msg_type: &str,
        fields: &serde_json::Map<String, Value>,
    ) -> Result<Vec<FieldArray>, IngestError> {
        let mut arrays = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            if value.is_object() || value.is_array() {
                tracing::warn!("Dropping non-scalar field {}.{} from static message", msg_type, name);
                continue;
            }
            if let Some(array) = Self::to_field_array(name, &[Some(value)]) {
                arrays.push(array);
            }
        }
        if arrays.is_empty() {
            return Err(IngestError::NoFields(msg_type.to_string()));
        }
        Ok(arrays)
    }

    /// Infer the column type from the first non-null sample, then coerce
    /// every sample to it. Returns None when all samples are null.
    fn to_field_array(name: &str, samples: &[Option<&Value>]) -> Option<FieldArray> {
        let first = samples.iter().flatten().find(|v| !v.is_null())?;
        let column_type = match first {
            Value::Number(_) | Value::Bool(_) => ColumnType::Real,
            Value::String(_) => ColumnType::Text,
            _ => return None,
        };

        let cells = samples
            .iter()
            .map(|sample| match sample {
                Some(v) => coerce_cell(v, column_type),
                None => Cell::Null,
            })
            .collect();

        Some(FieldArray { name: name.to_string(), column_type, cells })
    }

    /// Align array lengths onto the modal length: longer arrays are
    /// truncated, shorter ones dropped. When fields are dropped the schema
    /// is re-derived from what actually materialized.
    fn reconcile(msg_type: &str, mut arrays: Vec<FieldArray>) -> Vec<FieldArray> {
        if arrays.len() < 2 {
            return arrays;
        }

        let mut length_counts: HashMap<usize, usize> = HashMap::new();
        for array in &arrays {
            *length_counts.entry(array.cells.len()).or_insert(0) += 1;
        }
        if length_counts.len() == 1 {
            return arrays;
        }

        // Modal length wins; ties resolve toward the longer run of data
        let canonical = length_counts
            .iter()
            .max_by_key(|(len, count)| (**count, **len))
            .map(|(len, _)| *len)
            .unwrap_or(0);

        let before = arrays.len();
        arrays.retain_mut(|array| {
            if array.cells.len() > canonical {
                tracing::warn!(
                    "Truncating {}.{} from {} to {} rows",
                    msg_type,
                    array.name,
                    array.cells.len(),
                    canonical
                );
                array.cells.truncate(canonical);
                true
            } else if array.cells.len() < canonical {
                tracing::warn!(
                    "Dropping {}.{}: {} rows against canonical {}",
                    msg_type,
                    array.name,
                    array.cells.len(),
                    canonical
                );
                false
            } else {
                true
            }
        });

        if arrays.len() != before {
            tracing::warn!(
                "Schema of {} re-derived from materialized data: {} of {} fields kept",
                msg_type,
                arrays.len(),
                before
            );
        }

        arrays
    }
}

fn coerce_cell(value: &Value, column_type: ColumnType) -> Cell {
    match (column_type, value) {
        (_, Value::Null) => Cell::Null,
        (ColumnType::Real, Value::Number(n)) => n.as_f64().map(Cell::Real).unwrap_or(Cell::Null),
        (ColumnType::Real, Value::Bool(b)) => Cell::Real(if *b { 1.0 } else { 0.0 }),
        (ColumnType::Real, Value::String(s)) => {
            s.parse::<f64>().map(Cell::Real).unwrap_or(Cell::Null)
        },
        (ColumnType::Text, Value::String(s)) => Cell::Text(s.clone()),
        (ColumnType::Text, Value::Number(n)) => Cell::Text(n.to_string()),
        (ColumnType::Text, Value::Bool(b)) => Cell::Text(b.to_string()),
        _ => Cell::Null,
    }
}
