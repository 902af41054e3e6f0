//! Tests against real servers.
//!
//! Skipped unless DATABASE_URL (PostgreSQL) or MYSQL_URL is set.

use dbsage::config::ConnectionConfig;
use dbsage::db::{self, DatabaseClient};
use dbsage::tools::{ToolCatalog, GET_ALL_TABLES, GET_DATABASE_SIZE};
use serde_json::{json, Value};
use std::sync::Arc;

async fn live_client(var: &str) -> Option<Arc<dyn DatabaseClient>> {
    let url = std::env::var(var).ok()?;
    let config = ConnectionConfig::from_url("live", &url).ok()?;
    db::connect(&config).await.ok()
}

async fn exercise(client: Arc<dyn DatabaseClient>) {
    client.check().await.unwrap();

    let result = client.execute_sql("SELECT 1 AS one").await.unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.columns[0].name, "one");

    let catalog = ToolCatalog::new();
    let body = catalog
        .dispatch(Some(client.as_ref()), GET_ALL_TABLES, &json!({}))
        .await
        .unwrap();
    let tables: Value = serde_json::from_str(&body).unwrap();
    assert!(tables.is_array());

    let body = catalog
        .dispatch(Some(client.as_ref()), GET_DATABASE_SIZE, &json!({}))
        .await
        .unwrap();
    assert!(!body.contains("\"error\""), "{body}");

    let err = client.execute_sql("SELEC nonsense").await;
    assert!(err.is_err());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_live_postgres() {
    let Some(client) = live_client("DATABASE_URL").await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    exercise(client).await;
}

#[tokio::test]
async fn test_live_mysql() {
    let Some(client) = live_client("MYSQL_URL").await else {
        eprintln!("Skipping test: MYSQL_URL not set");
        return;
    };
    exercise(client).await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_to_closed_port_fails() {
    let config =
        ConnectionConfig::from_url("nowhere", "postgres://user:pw@127.0.0.1:1/db")
            .unwrap();
    assert!(db::connect(&config).await.is_err());
}
