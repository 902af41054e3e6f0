//! PostgreSQL database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `DatabaseClient` trait
//! for PostgreSQL databases using sqlx.

use crate::config::ConnectionConfig;
use crate::db::{
    collect_rows, connect_with_retry, duplicate_groups, duplicate_query, map_connection_error,
    split_table_name, with_query_timeout, ColumnDescriptor, ColumnInfo, DatabaseBackend,
    DatabaseClient, DatabaseSize, DuplicateGroup, IndexInfo, QueryResult, Row, RowBatch,
    SessionInfo, SlowQuery, TableInfo, TableSize, TableStats, MAX_ROWS,
};
use crate::error::{DbSageError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgQueryResult, PgRow, PgSslMode};
use sqlx::{Column as _, Executor, Postgres, Row as _, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Opens a pool for `config`, retrying transient failures.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let acquire_timeout = config.connect_timeout();

        let pool = connect_with_retry(|| {
            PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(acquire_timeout)
                .connect_with(options.clone())
        })
        .await
        .map_err(|e| map_connection_error(e, config))?;

        debug!(connection = %config.name, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_statement(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();

        let batch = with_query_timeout(collect_rows(
            (&self.pool).fetch_many(sqlx::query(sql)),
            MAX_ROWS,
            PgQueryResult::rows_affected,
        ))
        .await?;
        let RowBatch {
            rows,
            rows_affected,
            truncated,
        } = batch;

        let columns: Vec<ColumnInfo> = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => self.describe_columns(sql).await,
        };

        if truncated {
            warn!("Query returned more than {MAX_ROWS} rows, truncating");
        }

        let rows: Vec<Row> = rows.iter().map(convert_row).collect();

        Ok(QueryResult {
            columns,
            row_count: rows.len(),
            rows,
            rows_affected,
            duration_ms: start.elapsed().as_millis() as u64,
            truncated,
        })
    }

    /// Column metadata for statements that returned no rows. Best effort.
    async fn describe_columns(&self, sql: &str) -> Vec<ColumnInfo> {
        match (&self.pool).describe(sql).await {
            Ok(describe) => describe
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn connect_options(config: &ConnectionConfig) -> Result<PgConnectOptions> {
    let ssl_mode: PgSslMode = config
        .sslmode
        .as_deref()
        .unwrap_or("disable")
        .parse()
        .map_err(|e| DbSageError::config(format!("Invalid sslmode for '{}': {e}", config.name)))?;

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .ssl_mode(ssl_mode)
        .application_name("dbsage");

    if !config.username.is_empty() {
        options = options.username(&config.username);
    }
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }

    Ok(options)
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        self.run_statement(sql).await
    }

    async fn explain_query(&self, sql: &str) -> Result<QueryResult> {
        let statement = sql.trim().trim_end_matches(';');
        self.run_statement(&format!("EXPLAIN {statement}")).await
    }

    async fn get_all_tables(&self) -> Result<Vec<TableInfo>> {
        let rows: Vec<(String, String, String, Option<String>)> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    c.relname::text,
                    n.nspname::text,
                    CASE c.relkind
                        WHEN 'v' THEN 'view'
                        WHEN 'm' THEN 'materialized view'
                        WHEN 'f' THEN 'foreign table'
                        ELSE 'table'
                    END::text,
                    obj_description(c.oid, 'pg_class')
                FROM pg_class c
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f')
                    AND n.nspname NOT IN ('pg_catalog', 'information_schema')
                    AND n.nspname NOT LIKE 'pg_toast%'
                ORDER BY n.nspname, c.relname
                "#,
            )
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, schema, table_type, comment)| TableInfo {
                name,
                schema,
                table_type,
                comment,
            })
            .collect())
    }

    async fn get_table_schema(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let (schema, name) = split_table_name(table);

        let rows: Vec<(String, String, bool, Option<String>, bool, Option<String>)> =
            with_query_timeout(
                sqlx::query_as(
                    r#"
                    SELECT
                        a.attname::text,
                        format_type(a.atttypid, a.atttypmod),
                        NOT a.attnotnull,
                        pg_get_expr(d.adbin, d.adrelid),
                        EXISTS (
                            SELECT 1 FROM pg_index i
                            WHERE i.indrelid = c.oid AND i.indisprimary
                                AND a.attnum = ANY(i.indkey)
                        ),
                        col_description(c.oid, a.attnum)
                    FROM pg_attribute a
                    JOIN pg_class c ON c.oid = a.attrelid
                    JOIN pg_namespace n ON n.oid = c.relnamespace
                    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
                    WHERE c.relname = $1
                        AND n.nspname = COALESCE($2::text, current_schema())
                        AND a.attnum > 0
                        AND NOT a.attisdropped
                    ORDER BY a.attnum
                    "#,
                )
                .bind(name)
                .bind(schema)
                .fetch_all(&self.pool),
            )
            .await?;

        if rows.is_empty() {
            return Err(DbSageError::query(format!("Table '{table}' not found")));
        }

        Ok(rows
            .into_iter()
            .map(
                |(name, data_type, nullable, default, primary_key, comment)| ColumnDescriptor {
                    name,
                    data_type,
                    nullable,
                    default,
                    primary_key,
                    comment,
                },
            )
            .collect())
    }

    async fn get_table_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let (schema, name) = split_table_name(table);

        let rows: Vec<(String, Vec<String>, bool, bool, String)> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    i.relname::text,
                    ARRAY(
                        SELECT a.attname::text
                        FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
                        ORDER BY k.ord
                    ),
                    ix.indisunique,
                    ix.indisprimary,
                    am.amname::text
                FROM pg_class t
                JOIN pg_namespace n ON n.oid = t.relnamespace
                JOIN pg_index ix ON ix.indrelid = t.oid
                JOIN pg_class i ON i.oid = ix.indexrelid
                JOIN pg_am am ON am.oid = i.relam
                WHERE t.relname = $1
                    AND n.nspname = COALESCE($2::text, current_schema())
                ORDER BY i.relname
                "#,
            )
            .bind(name)
            .bind(schema)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, columns, unique, primary, index_type)| IndexInfo {
                name,
                columns,
                unique,
                primary,
                index_type,
            })
            .collect())
    }

    async fn get_table_stats(&self, table: &str) -> Result<TableStats> {
        let (schema, name) = split_table_name(table);

        type StatsRow = (
            String,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            Option<String>,
            Option<String>,
        );

        let row: Option<StatsRow> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    s.relname::text,
                    GREATEST(c.reltuples, 0)::bigint,
                    s.n_live_tup,
                    s.n_dead_tup,
                    s.seq_scan,
                    COALESCE(s.idx_scan, 0),
                    pg_total_relation_size(s.relid),
                    pg_table_size(s.relid),
                    pg_indexes_size(s.relid),
                    GREATEST(s.last_vacuum, s.last_autovacuum)::text,
                    GREATEST(s.last_analyze, s.last_autoanalyze)::text
                FROM pg_stat_user_tables s
                JOIN pg_class c ON c.oid = s.relid
                WHERE s.relname = $1
                    AND s.schemaname = COALESCE($2::text, current_schema())
                "#,
            )
            .bind(name)
            .bind(schema)
            .fetch_optional(&self.pool),
        )
        .await?;

        let Some((
            table_name,
            row_estimate,
            live_rows,
            dead_rows,
            seq_scans,
            index_scans,
            total_bytes,
            table_bytes,
            index_bytes,
            last_vacuum,
            last_analyze,
        )) = row
        else {
            return Err(DbSageError::query(format!("Table '{table}' not found")));
        };

        Ok(TableStats {
            table: table_name,
            row_estimate,
            live_rows,
            dead_rows,
            seq_scans,
            index_scans,
            total_bytes,
            table_bytes,
            index_bytes,
            last_vacuum,
            last_analyze,
        })
    }

    async fn get_table_sizes(&self) -> Result<Vec<TableSize>> {
        let rows: Vec<(String, i64, i64, i64)> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    CASE WHEN n.nspname = current_schema()
                        THEN c.relname::text
                        ELSE n.nspname || '.' || c.relname
                    END,
                    pg_table_size(c.oid),
                    pg_indexes_size(c.oid),
                    GREATEST(c.reltuples, 0)::bigint
                FROM pg_class c
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE c.relkind IN ('r', 'p', 'm')
                    AND n.nspname NOT IN ('pg_catalog', 'information_schema')
                    AND n.nspname NOT LIKE 'pg_toast%'
                ORDER BY pg_total_relation_size(c.oid) DESC
                LIMIT 50
                "#,
            )
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(table, table_bytes, index_bytes, rows)| {
                TableSize::new(table, table_bytes, index_bytes, rows)
            })
            .collect())
    }

    async fn find_duplicate_data(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<DuplicateGroup>> {
        let sql = duplicate_query(DatabaseBackend::Postgres, table, columns)?;
        Ok(duplicate_groups(self.run_statement(&sql).await?))
    }

    async fn get_slow_queries(&self) -> Result<Vec<SlowQuery>> {
        let result: Result<Vec<(String, i64, f64, f64, i64)>> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT query, calls, total_exec_time, mean_exec_time, rows
                FROM pg_stat_statements
                WHERE dbid = (SELECT oid FROM pg_database WHERE datname = current_database())
                ORDER BY mean_exec_time DESC
                LIMIT 10
                "#,
            )
            .fetch_all(&self.pool),
        )
        .await;

        match result {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|(query, calls, total_time_ms, mean_time_ms, rows)| SlowQuery {
                    query,
                    calls,
                    total_time_ms,
                    mean_time_ms,
                    rows,
                })
                .collect()),
            Err(e) => {
                debug!("pg_stat_statements unavailable: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn get_database_size(&self) -> Result<DatabaseSize> {
        let (database, size): (String, i64) = with_query_timeout(
            sqlx::query_as(
                "SELECT current_database()::text, pg_database_size(current_database())",
            )
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(DatabaseSize::new(database, size))
    }

    async fn get_active_connections(&self) -> Result<Vec<SessionInfo>> {
        type SessionRow = (
            i64,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<f64>,
        );

        let rows: Vec<SessionRow> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    pid::bigint,
                    usename::text,
                    datname::text,
                    state,
                    query,
                    client_addr::text,
                    EXTRACT(EPOCH FROM (now() - query_start))::float8
                FROM pg_stat_activity
                WHERE datname = current_database()
                ORDER BY query_start NULLS LAST
                "#,
            )
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, user, database, state, query, client, duration_secs)| SessionInfo {
                    id,
                    user,
                    database,
                    state,
                    query,
                    client,
                    duration_secs,
                },
            )
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn check(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(DbSageError::connection("Connection pool is closed"));
        }
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| DbSageError::connection("Health check timed out"))?
            .map_err(|e| DbSageError::connection(e.to_string()))?;
        Ok(())
    }
}

/// Converts a sqlx PgRow to JSON values.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

/// Converts a single column value to JSON, keyed on the server type name.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let value = match type_name {
        "BOOL" => get::<bool>(row, index).map(Value::Bool),
        "INT2" => get::<i16>(row, index).map(Value::from),
        "INT4" => get::<i32>(row, index).map(Value::from),
        "INT8" => get::<i64>(row, index).map(Value::from),
        "OID" => get::<sqlx::postgres::types::Oid>(row, index).map(|oid| Value::from(oid.0)),
        "FLOAT4" => get::<f32>(row, index).map(|v| Value::from(f64::from(v))),
        "FLOAT8" => get::<f64>(row, index).map(Value::from),
        "NUMERIC" => get::<rust_decimal::Decimal>(row, index).map(|d| Value::String(d.to_string())),
        "UUID" => get::<uuid::Uuid>(row, index).map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|ts| Value::String(ts.to_rfc3339())),
        "TIMESTAMP" => {
            get::<chrono::NaiveDateTime>(row, index).map(|ts| Value::String(ts.to_string()))
        }
        "DATE" => get::<chrono::NaiveDate>(row, index).map(|d| Value::String(d.to_string())),
        "TIME" => get::<chrono::NaiveTime>(row, index).map(|t| Value::String(t.to_string())),
        "JSON" | "JSONB" => get::<Value>(row, index),
        "BYTEA" => get::<Vec<u8>>(row, index).map(|bytes| Value::String(hex_bytes(&bytes))),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => get::<Vec<String>>(row, index).map(Value::from),
        "INT4[]" => get::<Vec<i32>>(row, index).map(Value::from),
        "INT8[]" => get::<Vec<i64>>(row, index).map(Value::from),
        _ => get::<String>(row, index).map(Value::String),
    };

    value.unwrap_or(Value::Null)
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
