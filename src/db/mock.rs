//! In-memory test doubles for the database layer.
//!
//! `MockDatabaseClient` records every call it receives so tests can assert on
//! dispatch. `MockConnector` hands out mock clients by connection name and can
//! be told to fail.

use super::{
    ColumnDescriptor, ColumnInfo, DatabaseBackend, DatabaseClient, DatabaseConnector,
    DatabaseSize, DuplicateGroup, IndexInfo, QueryResult, SessionInfo, SlowQuery, TableInfo,
    TableSize, TableStats,
};
use crate::config::ConnectionConfig;
use crate::error::{DbSageError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A mock database client that returns predefined results.
pub struct MockDatabaseClient {
    backend: DatabaseBackend,
    tables: Vec<(TableInfo, Vec<ColumnDescriptor>)>,
    query_results: HashMap<String, QueryResult>,
    query_error: Option<String>,
    healthy: AtomicBool,
    closed: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockDatabaseClient {
    pub fn new() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            tables: Vec::new(),
            query_results: HashMap::new(),
            query_error: None,
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_backend(mut self, backend: DatabaseBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Adds a table with the given column names (all `text`, first one is the
    /// primary key).
    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        let descriptors = columns
            .iter()
            .enumerate()
            .map(|(i, column)| ColumnDescriptor {
                name: column.to_string(),
                data_type: "text".to_string(),
                nullable: i != 0,
                default: None,
                primary_key: i == 0,
                comment: None,
            })
            .collect();
        self.tables.push((TableInfo::table(name, "public"), descriptors));
        self
    }

    /// Returns `result` whenever `sql` is executed verbatim.
    pub fn with_query_result(mut self, sql: impl Into<String>, result: QueryResult) -> Self {
        self.query_results.insert(sql.into(), result);
        self
    }

    /// Makes every `execute_sql` call fail with a query error.
    pub fn with_query_error(mut self, message: impl Into<String>) -> Self {
        self.query_error = Some(message.into());
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Calls received so far, formatted as `method` or `method: argument`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(':').next() == Some(method))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.into());
        }
    }

    fn columns_of(&self, table: &str) -> Option<&Vec<ColumnDescriptor>> {
        self.tables
            .iter()
            .find(|(info, _)| info.name == table)
            .map(|(_, columns)| columns)
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        self.record(format!("execute_sql: {sql}"));

        if let Some(message) = &self.query_error {
            return Err(DbSageError::query(message.clone()));
        }
        if let Some(result) = self.query_results.get(sql) {
            return Ok(result.clone());
        }

        if sql.trim_start().to_uppercase().starts_with("SELECT") {
            Ok(QueryResult::with_data(
                vec![ColumnInfo::new("result", "text")],
                vec![vec![Value::String(format!("Mock result for: {sql}"))]],
            ))
        } else {
            Ok(QueryResult {
                rows_affected: 1,
                ..QueryResult::default()
            })
        }
    }

    async fn explain_query(&self, sql: &str) -> Result<QueryResult> {
        self.record(format!("explain_query: {sql}"));
        Ok(QueryResult::with_data(
            vec![ColumnInfo::new("QUERY PLAN", "text")],
            vec![vec![Value::String("Seq Scan on mock  (cost=0.00..1.00)".into())]],
        ))
    }

    async fn get_all_tables(&self) -> Result<Vec<TableInfo>> {
        self.record("get_all_tables");
        Ok(self.tables.iter().map(|(info, _)| info.clone()).collect())
    }

    async fn get_table_schema(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.record(format!("get_table_schema: {table}"));
        self.columns_of(table)
            .cloned()
            .ok_or_else(|| DbSageError::query(format!("Table '{table}' not found")))
    }

    async fn get_table_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        self.record(format!("get_table_indexes: {table}"));
        let columns = self
            .columns_of(table)
            .ok_or_else(|| DbSageError::query(format!("Table '{table}' not found")))?;

        Ok(columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| IndexInfo {
                name: format!("{table}_pkey"),
                columns: vec![c.name.clone()],
                unique: true,
                primary: true,
                index_type: "btree".to_string(),
            })
            .collect())
    }

    async fn get_table_stats(&self, table: &str) -> Result<TableStats> {
        self.record(format!("get_table_stats: {table}"));
        if self.columns_of(table).is_none() {
            return Err(DbSageError::query(format!("Table '{table}' not found")));
        }
        Ok(TableStats {
            table: table.to_string(),
            ..TableStats::default()
        })
    }

    async fn get_table_sizes(&self) -> Result<Vec<TableSize>> {
        self.record("get_table_sizes");
        Ok(self
            .tables
            .iter()
            .map(|(info, _)| TableSize::new(info.name.clone(), 8192, 0, 0))
            .collect())
    }

    async fn find_duplicate_data(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<DuplicateGroup>> {
        self.record(format!("find_duplicate_data: {table}({})", columns.join(",")));
        Ok(Vec::new())
    }

    async fn get_slow_queries(&self) -> Result<Vec<SlowQuery>> {
        self.record("get_slow_queries");
        Ok(Vec::new())
    }

    async fn get_database_size(&self) -> Result<DatabaseSize> {
        self.record("get_database_size");
        Ok(DatabaseSize::new("mock", 0))
    }

    async fn get_active_connections(&self) -> Result<Vec<SessionInfo>> {
        self.record("get_active_connections");
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DbSageError::connection("Connection pool is closed"));
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(DbSageError::connection("Mock database is unreachable"));
        }
        Ok(())
    }
}

/// Hands out [`MockDatabaseClient`]s keyed by connection name.
#[derive(Default)]
pub struct MockConnector {
    clients: Mutex<HashMap<String, Arc<MockDatabaseClient>>>,
    failing: Mutex<HashSet<String>>,
    opened: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `client` whenever the connection named `name` is opened.
    pub fn with_client(self, name: &str, client: Arc<MockDatabaseClient>) -> Self {
        self.register(name, client);
        self
    }

    pub fn register(&self, name: &str, client: Arc<MockDatabaseClient>) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(name.to_string(), client);
        }
    }

    /// Makes opens of `name` fail (or succeed again).
    pub fn set_failing(&self, name: &str, failing: bool) {
        if let Ok(mut set) = self.failing.lock() {
            if failing {
                set.insert(name.to_string());
            } else {
                set.remove(name);
            }
        }
    }

    /// Names of every open attempt, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// The client registered (or created) for `name`.
    pub fn client(&self, name: &str) -> Option<Arc<MockDatabaseClient>> {
        self.clients.lock().ok()?.get(name).cloned()
    }
}

#[async_trait]
impl DatabaseConnector for MockConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(config.name.clone());
        }

        let failing = self
            .failing
            .lock()
            .map(|set| set.contains(&config.name))
            .unwrap_or(false);
        if failing {
            return Err(DbSageError::connection(format!(
                "Cannot connect to {}:{}. Check that the server is running.",
                config.host, config.port
            )));
        }

        let mut clients = self
            .clients
            .lock()
            .map_err(|_| DbSageError::internal("Mock connector lock poisoned"))?;
        let client = clients
            .entry(config.name.clone())
            .or_insert_with(|| {
                Arc::new(MockDatabaseClient::new().with_backend(config.db_type))
            })
            .clone();

        Ok(client)
    }
}
