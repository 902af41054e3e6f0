//! Routes tool calls to the database.

use super::*;
use crate::db::DatabaseClient;
use crate::error::{DbSageError, Result};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

pub const NO_CONNECTION_MESSAGE: &str =
    "No database connection available. Ask the user to add or switch to a connection with /add or /switch.";

impl ToolCatalog {
    /// Runs a tool and returns the JSON body for the tool response.
    ///
    /// Only an unknown tool name is an `Err`. A missing connection, bad
    /// arguments and database failures all come back as `{"error": "..."}`
    /// bodies so the model can react to them.
    pub async fn dispatch(
        &self,
        handle: Option<&dyn DatabaseClient>,
        name: &str,
        args: &Value,
    ) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| DbSageError::UnknownTool(name.to_string()))?;

        let extra: Vec<_> = args
            .as_object()
            .map(|obj| {
                let known = tool.known_keys();
                obj.keys()
                    .filter(|k| !known.contains(&k.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if !extra.is_empty() {
            debug!(tool = name, ?extra, "Ignoring unknown tool arguments");
        }

        let Some(db) = handle else {
            return Ok(json!({ "error": NO_CONNECTION_MESSAGE }).to_string());
        };

        let started = Instant::now();
        let outcome = invoke(db, name, args).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(body) => {
                info!(tool = name, duration_ms, "Tool call succeeded");
                Ok(body.to_string())
            }
            Err(e) => {
                info!(tool = name, duration_ms, error = %e, "Tool call failed");
                Ok(e.to_tool_body())
            }
        }
    }
}

impl ToolCatalog {
    /// Checks required arguments without touching the database.
    pub fn validate(&self, name: &str, args: &Value) -> Result<()> {
        if self.get(name).is_none() {
            return Err(DbSageError::UnknownTool(name.to_string()));
        }
        match name {
            EXECUTE_SQL | EXPLAIN_QUERY => str_arg(args, ARG_SQL).map(drop),
            GET_TABLE_SCHEMA | GET_TABLE_INDEXES | GET_TABLE_STATS => {
                str_arg(args, ARG_TABLE).map(drop)
            }
            FIND_DUPLICATE_DATA => {
                str_arg(args, ARG_TABLE)?;
                string_list_arg(args, ARG_COLUMNS).map(drop)
            }
            _ => Ok(()),
        }
    }
}

async fn invoke(db: &dyn DatabaseClient, name: &str, args: &Value) -> Result<Value> {
    match name {
        EXECUTE_SQL => to_json(db.execute_sql(str_arg(args, ARG_SQL)?).await?),
        EXPLAIN_QUERY => to_json(db.explain_query(str_arg(args, ARG_SQL)?).await?),
        GET_ALL_TABLES => to_json(db.get_all_tables().await?),
        GET_TABLE_SCHEMA => to_json(db.get_table_schema(str_arg(args, ARG_TABLE)?).await?),
        GET_TABLE_INDEXES => to_json(db.get_table_indexes(str_arg(args, ARG_TABLE)?).await?),
        GET_TABLE_STATS => to_json(db.get_table_stats(str_arg(args, ARG_TABLE)?).await?),
        FIND_DUPLICATE_DATA => {
            let table = str_arg(args, ARG_TABLE)?;
            let columns = string_list_arg(args, ARG_COLUMNS)?;
            to_json(db.find_duplicate_data(table, &columns).await?)
        }
        GET_SLOW_QUERIES => to_json(db.get_slow_queries().await?),
        GET_DATABASE_SIZE => to_json(db.get_database_size().await?),
        GET_TABLE_SIZES => to_json(db.get_table_sizes().await?),
        GET_ACTIVE_CONNECTIONS => to_json(db.get_active_connections().await?),
        other => Err(DbSageError::UnknownTool(other.to_string())),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| DbSageError::internal(format!("Failed to serialize tool result: {e}")))
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    match args.get(key) {
        None | Some(Value::Null) => Err(DbSageError::MalformedToolArgs(format!(
            "missing required argument '{key}'"
        ))),
        Some(value) => value
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                DbSageError::MalformedToolArgs(format!("'{key}' must be a non-empty string"))
            }),
    }
}

fn string_list_arg(args: &Value, key: &str) -> Result<Vec<String>> {
    let items = match args.get(key) {
        None | Some(Value::Null) => {
            return Err(DbSageError::MalformedToolArgs(format!(
                "missing required argument '{key}'"
            )))
        }
        Some(value) => value.as_array().ok_or_else(|| {
            DbSageError::MalformedToolArgs(format!("'{key}' must be an array of strings"))
        })?,
    };

    let columns: Vec<String> = items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<_>>()
        .ok_or_else(|| {
            DbSageError::MalformedToolArgs(format!("'{key}' must be an array of strings"))
        })?;

    if columns.is_empty() {
        return Err(DbSageError::MalformedToolArgs(format!(
            "'{key}' must name at least one column"
        )));
    }
    Ok(columns)
}
