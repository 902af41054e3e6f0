//! Result types returned by database operations.
//!
//! Everything here is `Serialize` because tool results are handed to the
//! model as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single result row, positionally aligned with `QueryResult::columns`.
pub type Row = Vec<Value>;

/// Result of executing a SQL statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,

    /// Number of rows returned (after truncation).
    pub row_count: usize,

    /// Rows affected by INSERT/UPDATE/DELETE style statements.
    #[serde(default)]
    pub rows_affected: u64,

    pub duration_ms: u64,

    /// Whether the result was cut off at the row limit.
    #[serde(default)]
    pub truncated: bool,
}

impl QueryResult {
    /// Creates a query result with the given columns and rows.
    pub fn with_data(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the value of `column` in row `row`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c.name == column)?;
        self.rows.get(row)?.get(index)
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A table or view visible to the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    #[serde(rename = "type")]
    pub table_type: String,
    pub comment: Option<String>,
}

impl TableInfo {
    pub fn table(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            table_type: "table".to_string(),
            comment: None,
        }
    }
}

/// One column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    pub index_type: String,
}

/// Usage and size statistics for a single table. Fields a backend cannot
/// report are zero or `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub table: String,
    pub row_estimate: i64,
    pub live_rows: i64,
    pub dead_rows: i64,
    pub seq_scans: i64,
    pub index_scans: i64,
    pub total_bytes: i64,
    pub table_bytes: i64,
    pub index_bytes: i64,
    pub last_vacuum: Option<String>,
    pub last_analyze: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSize {
    pub table: String,
    pub total_bytes: i64,
    pub table_bytes: i64,
    pub index_bytes: i64,
    pub total_pretty: String,
    pub row_estimate: i64,
}

impl TableSize {
    pub fn new(table: String, table_bytes: i64, index_bytes: i64, row_estimate: i64) -> Self {
        let total_bytes = table_bytes + index_bytes;
        Self {
            table,
            total_bytes,
            table_bytes,
            index_bytes,
            total_pretty: format_bytes(total_bytes),
            row_estimate,
        }
    }
}

/// A set of column values that appears more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub values: serde_json::Map<String, Value>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQuery {
    pub query: String,
    pub calls: i64,
    pub total_time_ms: f64,
    pub mean_time_ms: f64,
    pub rows: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSize {
    pub database: String,
    pub size_bytes: i64,
    pub size_pretty: String,
}

impl DatabaseSize {
    pub fn new(database: impl Into<String>, size_bytes: i64) -> Self {
        Self {
            database: database.into(),
            size_bytes,
            size_pretty: format_bytes(size_bytes),
        }
    }
}

/// A server session, as listed by `get_active_connections`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: i64,
    pub user: Option<String>,
    pub database: Option<String>,
    pub state: Option<String>,
    pub query: Option<String>,
    pub client: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Formats a byte count the way `pg_size_pretty` does.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["bytes", "kB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} bytes")
    } else {
        format!("{value:.0} {}", UNITS[unit])
    }
}
