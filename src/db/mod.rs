//! Database abstraction layer.
//!
//! [`DatabaseClient`] is the capability port the tool dispatcher talks to.
//! PostgreSQL and MySQL implementations are built on sqlx; an in-memory mock
//! is provided for tests.

mod mock;
mod mysql;
mod postgres;
mod types;

pub use mock::{MockConnector, MockDatabaseClient};
pub use mysql::MySqlClient;
pub use postgres::PostgresClient;
pub use types::{
    format_bytes, ColumnDescriptor, ColumnInfo, DatabaseSize, DuplicateGroup, IndexInfo,
    QueryResult, Row, SessionInfo, SlowQuery, TableInfo, TableSize, TableStats,
};

use crate::config::ConnectionConfig;
use crate::error::{DbSageError, Result};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use sqlx::Either;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Statement timeout applied to every query.
pub(crate) const QUERY_TIMEOUT_SECS: u64 = 30;

/// Maximum rows returned to the caller from a single statement.
pub(crate) const MAX_ROWS: usize = 1000;

/// Maximum number of groups returned by `find_duplicate_data`.
pub(crate) const MAX_DUPLICATE_GROUPS: usize = 100;

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Mysql,
}

impl DatabaseBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }

    /// Human-readable dialect name used in prompts.
    pub fn dialect_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Mysql => "MySQL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::Mysql),
            _ => None,
        }
    }

    /// Maps a connection URL scheme to a backend.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
        }
    }

    /// Quotes an identifier, handling `schema.table` qualified names.
    pub fn quote_ident(&self, ident: &str) -> String {
        let quote = match self {
            Self::Postgres => '"',
            Self::Mysql => '`',
        };
        ident
            .split('.')
            .map(|part| {
                let escaped = part.replace(quote, &format!("{quote}{quote}"));
                format!("{quote}{escaped}{quote}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens a database client for the given configuration.
pub async fn connect(config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
    match config.db_type {
        DatabaseBackend::Postgres => Ok(Arc::new(PostgresClient::connect(config).await?)),
        DatabaseBackend::Mysql => Ok(Arc::new(MySqlClient::connect(config).await?)),
    }
}

/// The database capability surface exposed to tools.
///
/// Table names may be schema-qualified (`schema.table`); unqualified names
/// resolve against the connection's default schema.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    fn backend(&self) -> DatabaseBackend;

    /// Executes arbitrary SQL. The statement is passed through untouched.
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;

    /// Returns the execution plan for `sql` without running it.
    async fn explain_query(&self, sql: &str) -> Result<QueryResult>;

    async fn get_all_tables(&self) -> Result<Vec<TableInfo>>;

    async fn get_table_schema(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    async fn get_table_indexes(&self, table: &str) -> Result<Vec<IndexInfo>>;

    async fn get_table_stats(&self, table: &str) -> Result<TableStats>;

    async fn get_table_sizes(&self) -> Result<Vec<TableSize>>;

    /// Groups rows of `table` by `columns` and returns groups seen more than once.
    async fn find_duplicate_data(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<DuplicateGroup>>;

    /// Most expensive statements, when the server tracks them. Returns an
    /// empty list when statement statistics are unavailable.
    async fn get_slow_queries(&self) -> Result<Vec<SlowQuery>>;

    async fn get_database_size(&self) -> Result<DatabaseSize>;

    async fn get_active_connections(&self) -> Result<Vec<SessionInfo>>;

    async fn close(&self) -> Result<()>;

    /// Round-trips a trivial query, reporting the failure if there is one.
    async fn check(&self) -> Result<()>;

    async fn is_healthy(&self) -> bool {
        self.check().await.is_ok()
    }
}

/// Opens clients for saved connection configurations.
///
/// The registry goes through this seam so tests can substitute
/// [`MockConnector`] for real network connections.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>>;
}

/// Connects through sqlx using [`connect`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxConnector;

#[async_trait]
impl DatabaseConnector for SqlxConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
        connect(config).await
    }
}

/// Splits `schema.table` into its parts.
pub(crate) fn split_table_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => (Some(schema), table),
        _ => (None, name),
    }
}

/// Builds the GROUP BY query behind `find_duplicate_data`.
pub(crate) fn duplicate_query(
    backend: DatabaseBackend,
    table: &str,
    columns: &[String],
) -> Result<String> {
    if columns.is_empty() {
        return Err(DbSageError::query(
            "At least one column is required to look for duplicates",
        ));
    }

    let column_list = columns
        .iter()
        .map(|c| backend.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "SELECT {column_list}, COUNT(*) AS duplicate_count FROM {} \
         GROUP BY {column_list} HAVING COUNT(*) > 1 \
         ORDER BY duplicate_count DESC LIMIT {MAX_DUPLICATE_GROUPS}",
        backend.quote_ident(table)
    ))
}

/// Turns the result of [`duplicate_query`] into groups. The count is the last
/// column.
pub(crate) fn duplicate_groups(result: QueryResult) -> Vec<DuplicateGroup> {
    let Some((_, value_columns)) = result.columns.split_last() else {
        return Vec::new();
    };

    result
        .rows
        .into_iter()
        .map(|mut row| {
            let count = row.pop().and_then(|v| count_value(&v)).unwrap_or(0);
            let values = value_columns
                .iter()
                .map(|c| c.name.clone())
                .zip(row)
                .collect();
            DuplicateGroup { values, count }
        })
        .collect()
}

fn count_value(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Runs `connect` with exponential backoff on transient errors.
pub(crate) async fn connect_with_retry<T, F, Fut>(mut connect: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut attempt = 1;

    loop {
        debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

        match connect().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_transient_error(&e) => {
                warn!(
                    "Connection attempt {} failed (transient error), retrying in {:?}",
                    attempt, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    if matches!(error, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) {
        return true;
    }

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("authentication failed")
        || error_str.contains("access denied")
        || error_str.contains("does not exist")
        || error_str.contains("unknown database")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-facing messages. Never includes the
/// password.
pub(crate) fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> DbSageError {
    let host = &config.host;
    let port = config.port;
    let user = if config.username.is_empty() {
        "unknown"
    } else {
        &config.username
    };
    let database = &config.database;

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        DbSageError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("authentication failed") || error_str.contains("access denied") {
        DbSageError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if (error_str.contains("does not exist") && error_str.contains("database"))
        || error_str.contains("unknown database")
    {
        DbSageError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        DbSageError::connection(
            "TLS negotiation failed. Check the sslmode of this connection.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        DbSageError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        DbSageError::connection(error.to_string())
    }
}

/// Rows read from a `fetch_many` stream, capped at a limit.
#[derive(Debug)]
pub(crate) struct RowBatch<R> {
    pub rows: Vec<R>,
    pub rows_affected: u64,
    /// The stream had more rows than the limit.
    pub truncated: bool,
}

/// Drains a `fetch_many` stream, stopping at the first row past `limit`.
///
/// Dropping the stream early ends the fetch, so a huge result never lands
/// in memory.
pub(crate) async fn collect_rows<S, D, R, E>(
    mut stream: S,
    limit: usize,
    rows_affected: impl Fn(&D) -> u64,
) -> std::result::Result<RowBatch<R>, E>
where
    S: Stream<Item = std::result::Result<Either<D, R>, E>> + Unpin,
{
    let mut batch = RowBatch {
        rows: Vec::new(),
        rows_affected: 0,
        truncated: false,
    };
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => batch.rows_affected += rows_affected(&done),
            Either::Right(row) if batch.rows.len() < limit => batch.rows.push(row),
            Either::Right(_) => {
                batch.truncated = true;
                break;
            }
        }
    }
    Ok(batch)
}

/// Wraps a query future in the statement timeout.
pub(crate) async fn with_query_timeout<T, Fut>(fut: Fut) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    tokio::time::timeout(Duration::from_secs(QUERY_TIMEOUT_SECS), fut)
        .await
        .map_err(|_| {
            DbSageError::query(format!(
                "Query timed out after {QUERY_TIMEOUT_SECS} seconds"
            ))
        })?
        .map_err(|e| DbSageError::query(format_query_error(e)))
}

/// Formats a query error, including server detail and hint when present.
pub(crate) fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = format!("ERROR: {}", db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        let fields = [
            ("DETAIL", pg_error.detail()),
            ("HINT", pg_error.hint()),
            ("TABLE", pg_error.table()),
            ("COLUMN", pg_error.column()),
            ("CONSTRAINT", pg_error.constraint()),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                result.push_str(&format!("\n  {label}: {value}"));
            }
        }
    } else if let Some(code) = db_error.code() {
        result.push_str(&format!("\n  CODE: {code}"));
    }

    result
}
