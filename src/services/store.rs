//! Tabular Store - in-memory analytical SQL engine over ingested telemetry.
//!
//! One store per session. Tables are written once during ingest and
//! read-only afterwards; the query path accepts SELECT statements only.
//! SQLite integers are narrowed to finite reals at the serialization
//! boundary, never inside the engine, so aggregate counts stay exact
//! internally. Counts exceeding the f64 mantissa are out of support.

use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::models::{ColumnInfo, ColumnType};

/// Tabular store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Row width {got} does not match column count {expected}")]
    ColumnCountMismatch { expected: usize, got: usize },

    #[error("Only read-only SELECT statements are allowed")]
    ReadOnly,

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Internal(String),
}

/// One cell of a row being inserted
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Real(f64),
    Text(String),
    Null,
}

impl Cell {
    /// Render as a SQL literal for a multi-row VALUES statement.
    /// String cells escape embedded quotes by doubling.
    fn to_sql_literal(&self) -> String {
        match self {
            Cell::Real(v) if v.is_finite() => format!("{}", v),
            Cell::Real(_) => "NULL".to_string(),
            Cell::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Cell::Null => "NULL".to_string(),
        }
    }
}

/// Result of a query: column names plus JSON-ready rows
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// In-memory SQL engine owning the tables derived from one parsed log
pub struct TabularStore {
    conn: Mutex<Connection>,
}

/// Rows per INSERT statement; bounds statement size on large logs
const INSERT_BATCH_ROWS: usize = 400;

impl TabularStore {
    pub fn new() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        register_percentile(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("store mutex poisoned".to_string()))
    }

    /// Create a table. Fails if the name is already taken.
    ///
    /// When `indexed` is set and a `time_boot_ms` column is present, an index
    /// is created on it to accelerate range scans.
    pub fn create_table(
        &self,
        name: &str,
        columns: &[ColumnInfo],
        indexed: bool,
    ) -> Result<(), StoreError> {
        if columns.is_empty() {
            return Err(StoreError::Internal(format!("table {} has no columns", name)));
        }

        let conn = self.conn()?;
        if table_exists(&conn, name)? {
            return Err(StoreError::TableExists(name.to_string()));
        }

        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
            .collect();
        let ddl = format!("CREATE TABLE {} ({})", quote_ident(name), column_defs.join(", "));
        conn.execute(&ddl, [])?;

        if indexed && columns.iter().any(|c| c.name == "time_boot_ms") {
            let idx = format!(
                "CREATE INDEX {} ON {} (time_boot_ms)",
                quote_ident(&format!("idx_{}_time", name)),
                quote_ident(name)
            );
            conn.execute(&idx, [])?;
        }

        Ok(())
    }

    /// Insert rows with a single multi-row VALUES statement per batch.
    /// Fails on any row whose width differs from the column count.
    pub fn bulk_insert(
        &self,
        name: &str,
        columns: &[ColumnInfo],
        rows: &[Vec<Cell>],
    ) -> Result<usize, StoreError> {
        for row in rows {
            if row.len() != columns.len() {
                return Err(StoreError::ColumnCountMismatch {
                    expected: columns.len(),
                    got: row.len(),
                });
            }
        }

        let conn = self.conn()?;
        if !table_exists(&conn, name)? {
            return Err(StoreError::UnknownTable(name.to_string()));
        }

        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        let prefix = format!("INSERT INTO {} ({}) VALUES ", quote_ident(name), column_list.join(", "));

        let mut inserted = 0;
        for batch in rows.chunks(INSERT_BATCH_ROWS) {
            let values: Vec<String> = batch
                .iter()
                .map(|row| {
                    let cells: Vec<String> = row.iter().map(Cell::to_sql_literal).collect();
                    format!("({})", cells.join(", "))
                })
                .collect();
            inserted += conn.execute(&format!("{}{}", prefix, values.join(", ")), [])?;
        }

        Ok(inserted)
    }

    /// Execute a read-only query and return JSON-ready rows.
    ///
    /// The compiled statement must be read-only per SQLite itself, which
    /// also rejects CTE-prefixed DML (`WITH ... DELETE`) that a prefix
    /// check would let through. Integers are narrowed to reals here so
    /// results round-trip to the wire as finite JSON numbers; non-finite
    /// reals become null.
    pub fn query(&self, sql: &str) -> Result<QueryOutput, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(StoreError::ReadOnly);
        }
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut raw = stmt.query([])?;
        while let Some(row) = raw.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                cells.push(value_to_json(row.get_ref(i)?));
            }
            rows.push(cells);
        }

        Ok(QueryOutput { columns, rows })
    }

    pub fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn describe(&self, name: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let conn = self.conn()?;
        if !table_exists(&conn, name)? {
            return Err(StoreError::UnknownTable(name.to_string()));
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let decl: String = row.get(2)?;
                let column_type = if decl.eq_ignore_ascii_case("real") {
                    ColumnType::Real
                } else {
                    ColumnType::Text
                };
                Ok(ColumnInfo { name, column_type })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => json_real(i as f64),
        ValueRef::Real(f) => json_real(f),
        ValueRef::Text(t) => {
            serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
        },
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

fn json_real(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

// ============================================================================
// Identifier quoting
// ============================================================================

/// SQL keywords that collide with telemetry field names in practice
static RESERVED_KEYWORDS: &[&str] = &[
    "abort", "action", "add", "after", "all", "alter", "and", "as", "asc", "attach", "autoincrement",
    "before", "begin", "between", "by", "cascade", "case", "cast", "check", "collate", "column",
    "commit", "constraint", "create", "cross", "current", "default", "deferrable", "delete", "desc",
    "distinct", "drop", "each", "else", "end", "escape", "except", "exists", "explain", "filter",
    "for", "foreign", "from", "full", "group", "having", "if", "ignore", "in", "index", "inner",
    "insert", "instead", "intersect", "into", "is", "join", "key", "left", "like", "limit", "match",
    "natural", "no", "not", "null", "of", "offset", "on", "or", "order", "outer", "over", "plan",
    "pragma", "primary", "query", "raise", "range", "references", "regexp", "reindex", "release",
    "rename", "replace", "restrict", "right", "rollback", "row", "rows", "select", "set", "table",
    "temp", "temporary", "then", "to", "transaction", "trigger", "union", "unique", "update",
    "using", "vacuum", "values", "view", "virtual", "when", "where", "window", "with", "without",
];

fn is_reserved(name: &str) -> bool {
    static SET: once_cell::sync::Lazy<HashSet<&'static str>> =
        once_cell::sync::Lazy::new(|| RESERVED_KEYWORDS.iter().copied().collect());
    SET.contains(name.to_ascii_lowercase().as_str())
}

/// Quote an identifier when it collides with a reserved keyword or contains
/// characters outside [A-Za-z0-9_]
pub fn quote_ident(name: &str) -> String {
    let plain = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !is_reserved(name);
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

// ============================================================================
// percentile(x, p) aggregate, p in [0, 100]
// ============================================================================

struct Percentile;

struct PercentileState {
    values: Vec<f64>,
    fraction: Option<f64>,
}

impl Aggregate<PercentileState, Option<f64>> for Percentile {
    fn init(&self, _ctx: &mut Context<'_>) -> rusqlite::Result<PercentileState> {
        Ok(PercentileState { values: Vec::new(), fraction: None })
    }

    fn step(&self, ctx: &mut Context<'_>, state: &mut PercentileState) -> rusqlite::Result<()> {
        let p: f64 = ctx.get(1)?;
        if !(0.0..=100.0).contains(&p) {
            return Err(rusqlite::Error::UserFunctionError(
                format!("percentile fraction {} out of [0, 100]", p).into(),
            ));
        }
        state.fraction = Some(p / 100.0);

        if let Some(v) = ctx.get::<Option<f64>>(0)? {
            if v.is_finite() {
                state.values.push(v);
            }
        }
        Ok(())
    }

    fn finalize(
        &self,
        _ctx: &mut Context<'_>,
        state: Option<PercentileState>,
    ) -> rusqlite::Result<Option<f64>> {
        let Some(mut state) = state else {
            return Ok(None);
        };
        let Some(fraction) = state.fraction else {
            return Ok(None);
        };
        if state.values.is_empty() {
            return Ok(None);
        }

        state
            .values
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = fraction * (state.values.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        if lower == upper {
            return Ok(Some(state.values[lower]));
        }
        let weight = rank - lower as f64;
        Ok(Some(state.values[lower] * (1.0 - weight) + state.values[upper] * weight))
    }
}

fn register_percentile(conn: &Connection) -> Result<(), StoreError> {
    conn.create_aggregate_function(
        "percentile",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        Percentile,
    )?;
    Ok(())
}
