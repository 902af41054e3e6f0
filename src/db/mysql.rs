//! MySQL database client implementation.
//!
//! Mirrors [`super::PostgresClient`] on top of sqlx's MySQL driver, reading
//! metadata from `information_schema` and `performance_schema`.

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
use sqlx::mysql::{
    MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlQueryResult, MySqlRow,
};
use sqlx::{Column as _, Executor, MySql, Row as _, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// MySQL database client.
#[derive(Debug)]
pub struct MySqlClient {
    pool: MySqlPool,
}

impl MySqlClient {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .charset(config.charset.as_deref().unwrap_or("utf8mb4"));

        if let Some(collation) = config.collation.as_deref() {
            options = options.collation(collation);
        }
        if !config.username.is_empty() {
            options = options.username(&config.username);
        }
        if !config.password.is_empty() {
            options = options.password(&config.password);
        }

        let acquire_timeout = config.connect_timeout();
        let pool = connect_with_retry(|| {
            MySqlPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(acquire_timeout)
                .connect_with(options.clone())
        })
        .await
        .map_err(|e| map_connection_error(e, config))?;

        debug!(connection = %config.name, "Connected to MySQL");
        Ok(Self { pool })
    }

    async fn run_statement(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();

        let batch = with_query_timeout(collect_rows(
            (&self.pool).fetch_many(sqlx::query(sql)),
            MAX_ROWS,
            MySqlQueryResult::rows_affected,
        ))
        .await?;
        let RowBatch {
            rows,
            rows_affected,
            truncated,
        } = batch;

        let columns: Vec<ColumnInfo> = rows
            .first()
            .map(|first| {
                first
                    .columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                    .collect()
            })
            .unwrap_or_default();

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
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Mysql
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
                    CAST(TABLE_NAME AS CHAR),
                    CAST(TABLE_SCHEMA AS CHAR),
                    CAST(CASE TABLE_TYPE WHEN 'VIEW' THEN 'view' ELSE 'table' END AS CHAR),
                    CAST(NULLIF(TABLE_COMMENT, '') AS CHAR)
                FROM information_schema.TABLES
                WHERE TABLE_SCHEMA = DATABASE()
                ORDER BY TABLE_NAME
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

        let rows: Vec<(String, String, i64, Option<String>, i64, Option<String>)> =
            with_query_timeout(
                sqlx::query_as(
                    r#"
                    SELECT
                        CAST(COLUMN_NAME AS CHAR),
                        CAST(COLUMN_TYPE AS CHAR),
                        CAST(IS_NULLABLE = 'YES' AS SIGNED),
                        CAST(COLUMN_DEFAULT AS CHAR),
                        CAST(COLUMN_KEY = 'PRI' AS SIGNED),
                        CAST(NULLIF(COLUMN_COMMENT, '') AS CHAR)
                    FROM information_schema.COLUMNS
                    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
                    ORDER BY ORDINAL_POSITION
                    "#,
                )
                .bind(schema)
                .bind(name)
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
                    nullable: nullable != 0,
                    default,
                    primary_key: primary_key != 0,
                    comment,
                },
            )
            .collect())
    }

    async fn get_table_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let (schema, name) = split_table_name(table);

        let rows: Vec<(String, String, i64, String)> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    CAST(INDEX_NAME AS CHAR),
                    CAST(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX SEPARATOR ',') AS CHAR),
                    CAST(MIN(NON_UNIQUE) AS SIGNED),
                    CAST(INDEX_TYPE AS CHAR)
                FROM information_schema.STATISTICS
                WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
                GROUP BY INDEX_NAME, INDEX_TYPE
                ORDER BY INDEX_NAME
                "#,
            )
            .bind(schema)
            .bind(name)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, columns, non_unique, index_type)| IndexInfo {
                primary: name == "PRIMARY",
                name,
                columns: columns.split(',').map(String::from).collect(),
                unique: non_unique == 0,
                index_type,
            })
            .collect())
    }

    async fn get_table_stats(&self, table: &str) -> Result<TableStats> {
        let (schema, name) = split_table_name(table);

        let row: Option<(String, Option<i64>, Option<i64>, Option<i64>, Option<String>)> =
            with_query_timeout(
                sqlx::query_as(
                    r#"
                    SELECT
                        CAST(TABLE_NAME AS CHAR),
                        CAST(TABLE_ROWS AS SIGNED),
                        CAST(DATA_LENGTH AS SIGNED),
                        CAST(INDEX_LENGTH AS SIGNED),
                        CAST(UPDATE_TIME AS CHAR)
                    FROM information_schema.TABLES
                    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
                    "#,
                )
                .bind(schema)
                .bind(name)
                .fetch_optional(&self.pool),
            )
            .await?;

        let Some((table_name, rows, data_bytes, index_bytes, _updated)) = row else {
            return Err(DbSageError::query(format!("Table '{table}' not found")));
        };

        let data_bytes = data_bytes.unwrap_or(0);
        let index_bytes = index_bytes.unwrap_or(0);
        let rows = rows.unwrap_or(0);

        Ok(TableStats {
            table: table_name,
            row_estimate: rows,
            live_rows: rows,
            total_bytes: data_bytes + index_bytes,
            table_bytes: data_bytes,
            index_bytes,
            ..TableStats::default()
        })
    }

    async fn get_table_sizes(&self) -> Result<Vec<TableSize>> {
        let rows: Vec<(String, Option<i64>, Option<i64>, Option<i64>)> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    CAST(TABLE_NAME AS CHAR),
                    CAST(DATA_LENGTH AS SIGNED),
                    CAST(INDEX_LENGTH AS SIGNED),
                    CAST(TABLE_ROWS AS SIGNED)
                FROM information_schema.TABLES
                WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
                ORDER BY COALESCE(DATA_LENGTH, 0) + COALESCE(INDEX_LENGTH, 0) DESC
                LIMIT 50
                "#,
            )
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(table, data, index, rows)| {
                TableSize::new(table, data.unwrap_or(0), index.unwrap_or(0), rows.unwrap_or(0))
            })
            .collect())
    }

    async fn find_duplicate_data(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<DuplicateGroup>> {
        let sql = duplicate_query(DatabaseBackend::Mysql, table, columns)?;
        Ok(duplicate_groups(self.run_statement(&sql).await?))
    }

    async fn get_slow_queries(&self) -> Result<Vec<SlowQuery>> {
        // Timer columns are in picoseconds; dividing by a float literal keeps
        // the result a DOUBLE.
        let result: Result<Vec<(String, i64, f64, f64, i64)>> = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    CAST(DIGEST_TEXT AS CHAR),
                    CAST(COUNT_STAR AS SIGNED),
                    SUM_TIMER_WAIT / 1e9,
                    AVG_TIMER_WAIT / 1e9,
                    CAST(SUM_ROWS_SENT AS SIGNED)
                FROM performance_schema.events_statements_summary_by_digest
                WHERE SCHEMA_NAME = DATABASE() AND DIGEST_TEXT IS NOT NULL
                ORDER BY AVG_TIMER_WAIT DESC
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
                debug!("performance_schema digests unavailable: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn get_database_size(&self) -> Result<DatabaseSize> {
        let (database, size): (String, i64) = with_query_timeout(
            sqlx::query_as(
                r#"
                SELECT
                    CAST(DATABASE() AS CHAR),
                    CAST(COALESCE(SUM(DATA_LENGTH + INDEX_LENGTH), 0) AS SIGNED)
                FROM information_schema.TABLES
                WHERE TABLE_SCHEMA = DATABASE()
                "#,
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
                    CAST(ID AS SIGNED),
                    CAST(USER AS CHAR),
                    CAST(DB AS CHAR),
                    CAST(COMMAND AS CHAR),
                    CAST(INFO AS CHAR),
                    CAST(HOST AS CHAR),
                    TIME + 0e0
                FROM information_schema.PROCESSLIST
                WHERE DB = DATABASE()
                ORDER BY TIME DESC
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

fn convert_row(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn get<'r, T>(row: &'r MySqlRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    let value = match type_name {
        "BOOLEAN" => get::<bool>(row, index).map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            get::<i64>(row, index).map(Value::from)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => get::<u64>(row, index).map(Value::from),
        "FLOAT" => get::<f32>(row, index).map(|v| Value::from(f64::from(v))),
        "DOUBLE" => get::<f64>(row, index).map(Value::from),
        "DECIMAL" => get::<rust_decimal::Decimal>(row, index).map(|d| Value::String(d.to_string())),
        "TIMESTAMP" => get::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|ts| Value::String(ts.to_rfc3339())),
        "DATETIME" => {
            get::<chrono::NaiveDateTime>(row, index).map(|ts| Value::String(ts.to_string()))
        }
        "DATE" => get::<chrono::NaiveDate>(row, index).map(|d| Value::String(d.to_string())),
        "TIME" => get::<chrono::NaiveTime>(row, index).map(|t| Value::String(t.to_string())),
        "JSON" => get::<Value>(row, index),
        _ => get::<String>(row, index).map(Value::String).or_else(|| {
            get::<Vec<u8>>(row, index)
                .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }),
    };

    value.unwrap_or(Value::Null)
}
