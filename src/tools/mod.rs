//! Tools the model can call.
//!
//! The catalog is fixed at start-up. Each tool maps to one method on
//! [`DatabaseClient`](crate::db::DatabaseClient) and carries a risk level
//! that decides whether the user has to approve the call.

mod dispatch;

use crate::db::DatabaseBackend;
use crate::safety::SqlClassifier;
use serde_json::{json, Value};
use std::fmt;

pub use dispatch::NO_CONNECTION_MESSAGE;

pub const EXECUTE_SQL: &str = "execute_sql";
pub const EXPLAIN_QUERY: &str = "explain_query";
pub const GET_ALL_TABLES: &str = "get_all_tables";
pub const GET_TABLE_SCHEMA: &str = "get_table_schema";
pub const GET_TABLE_INDEXES: &str = "get_table_indexes";
pub const GET_TABLE_STATS: &str = "get_table_stats";
pub const FIND_DUPLICATE_DATA: &str = "find_duplicate_data";
pub const GET_SLOW_QUERIES: &str = "get_slow_queries";
pub const GET_DATABASE_SIZE: &str = "get_database_size";
pub const GET_TABLE_SIZES: &str = "get_table_sizes";
pub const GET_ACTIVE_CONNECTIONS: &str = "get_active_connections";

const ARG_SQL: &str = "sql";
const ARG_TABLE: &str = "tableName";
const ARG_COLUMNS: &str = "columns";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool as declared to the model.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    /// Shown to the model.
    pub description: &'static str,
    /// JSON schema of the arguments object.
    pub parameters: Value,
    pub risk: RiskLevel,
    pub requires_confirmation: bool,
    /// Shown to the user in the confirmation dialog.
    pub confirm_text: &'static str,
}

impl ToolDescriptor {
    /// Argument keys declared in the schema.
    fn known_keys(&self) -> Vec<&str> {
        self.parameters["properties"]
            .as_object()
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Serializes the descriptor in the chat completions `tools` format.
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// The fixed set of tools.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        let no_args = || json!({"type": "object", "properties": {}, "required": []});
        let sql_arg = |what: &str| {
            json!({
                "type": "object",
                "properties": {
                    ARG_SQL: {"type": "string", "description": what}
                },
                "required": [ARG_SQL]
            })
        };
        let table_arg = || {
            json!({
                "type": "object",
                "properties": {
                    ARG_TABLE: {
                        "type": "string",
                        "description": "Table name, optionally schema-qualified (schema.table)"
                    }
                },
                "required": [ARG_TABLE]
            })
        };
        let low = |name: &'static str, description: &'static str, parameters: Value| ToolDescriptor {
            name,
            description,
            parameters,
            risk: RiskLevel::Low,
            requires_confirmation: false,
            confirm_text: "",
        };

        let tools = vec![
            ToolDescriptor {
                name: EXECUTE_SQL,
                description: "Execute a SQL statement against the current database and return \
                              the columns and rows. Use this for every query and for any \
                              statement that changes data or schema. The user must approve \
                              each call.",
                parameters: sql_arg("The SQL statement to run, exactly as it should execute"),
                risk: RiskLevel::High,
                requires_confirmation: true,
                confirm_text: "Run a SQL statement against the current database.",
            },
            low(
                EXPLAIN_QUERY,
                "Show the execution plan for a SQL query without running it.",
                sql_arg("The SQL query to explain"),
            ),
            low(
                GET_ALL_TABLES,
                "List every table and view visible in the current database, with schema, \
                 type and comment.",
                no_args(),
            ),
            low(
                GET_TABLE_SCHEMA,
                "Describe the columns of a table: name, type, nullability, default, \
                 primary key and comment.",
                table_arg(),
            ),
            low(
                GET_TABLE_INDEXES,
                "List the indexes defined on a table.",
                table_arg(),
            ),
            low(
                GET_TABLE_STATS,
                "Row estimates, scan counts, sizes and maintenance timestamps for a table.",
                table_arg(),
            ),
            ToolDescriptor {
                name: FIND_DUPLICATE_DATA,
                description: "Find values that occur more than once in the given columns of \
                              a table. Returns each duplicated combination with its count, \
                              most frequent first.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        ARG_TABLE: {"type": "string", "description": "Table to scan"},
                        ARG_COLUMNS: {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Columns whose combined values should be unique"
                        }
                    },
                    "required": [ARG_TABLE, ARG_COLUMNS]
                }),
                risk: RiskLevel::Medium,
                requires_confirmation: true,
                confirm_text: "Scan a whole table grouping by the given columns.",
            },
            low(
                GET_SLOW_QUERIES,
                "List the most expensive statements recorded by the server, when statement \
                 statistics are enabled.",
                no_args(),
            ),
            low(
                GET_DATABASE_SIZE,
                "Total size of the current database.",
                no_args(),
            ),
            low(
                GET_TABLE_SIZES,
                "Size of every table, including indexes, largest first.",
                no_args(),
            ),
            low(
                GET_ACTIVE_CONNECTIONS,
                "List sessions currently connected to the database server.",
                no_args(),
            ),
        ];

        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Tool declarations in the format the chat completions API expects.
    pub fn describe_all(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDescriptor::to_openai).collect()
    }

    /// Unknown tools are never auto-approved.
    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.get(name).map_or(true, |t| t.requires_confirmation)
    }

    pub fn risk(&self, name: &str) -> Option<RiskLevel> {
        self.get(name).map(|t| t.risk)
    }

    /// Confirmation prompt text for a call.
    ///
    /// For `execute_sql` the statement is shown verbatim together with its
    /// classification in the current dialect.
    pub fn describe(&self, name: &str, args: &Value, backend: Option<DatabaseBackend>) -> String {
        let Some(tool) = self.get(name) else {
            return format!("Call unknown tool '{name}'.");
        };

        match name {
            EXECUTE_SQL => {
                let sql = args[ARG_SQL].as_str().unwrap_or_default();
                let classification = SqlClassifier::for_backend(backend).classify(sql);
                let mut text = format!(
                    "{}\nRisk: {}\n\n{sql}\n\nStatement: {}",
                    tool.confirm_text,
                    tool.risk,
                    classification.label()
                );
                if let Some(warning) = classification.warning {
                    text.push_str("\nWarning: ");
                    text.push_str(&warning);
                }
                text
            }
            FIND_DUPLICATE_DATA => {
                let table = args[ARG_TABLE].as_str().unwrap_or("?");
                let columns = args[ARG_COLUMNS]
                    .as_array()
                    .map(|cols| {
                        cols.iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                format!(
                    "{}\nRisk: {}\n\nTable: {table}\nColumns: {columns}",
                    tool.confirm_text, tool.risk
                )
            }
            _ => format!("Call {name}.\nRisk: {}", tool.risk),
        }
    }

    /// Short one-line form of a call for the chat log, e.g.
    /// `get_table_schema(users)`.
    pub fn summarize(&self, name: &str, args: &Value) -> String {
        let detail = [ARG_SQL, ARG_TABLE]
            .iter()
            .find_map(|key| args.get(*key).and_then(Value::as_str));

        match detail {
            Some(detail) => {
                let detail = detail.split_whitespace().collect::<Vec<_>>().join(" ");
                let shown: String = detail.chars().take(60).collect();
                if shown.len() < detail.len() {
                    format!("{name}({shown}...)")
                } else {
                    format!("{name}({shown})")
                }
            }
            None => format!("{name}()"),
        }
    }
}
