//! Prompt construction for completion requests.

use crate::db::DatabaseBackend;
use crate::llm::types::{Message, Transcript};

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are dbsage, a database assistant running in the user's terminal. You answer questions about a relational database by calling the tools you have been given.

CURRENT CONNECTION:
{target}

TOOLS:
- get_all_tables, get_table_schema, get_table_indexes, get_table_stats, get_table_sizes: explore structure and size
- explain_query: show a plan without running the statement
- get_slow_queries, get_database_size, get_active_connections: server health
- find_duplicate_data: find repeated values in columns (the user must approve it)
- execute_sql: run any SQL statement (the user must approve it)

INSTRUCTIONS:
- Look at the schema before writing queries against tables you have not seen
- Write SQL in the {dialect} dialect
- Any statement that changes data or schema (INSERT, UPDATE, DELETE, DDL) must go through execute_sql; never claim to have changed data without it
- Call one tool at a time and wait for its result
- If a tool returns an error, explain it and suggest a fix instead of retrying blindly
- If the user declines a tool call, do not repeat it unless asked
- Keep answers short and show relevant query results as compact tables"#;

/// Builds the system prompt for the connection that is current when the
/// request is made.
pub fn build_system_prompt(target: Option<(&str, DatabaseBackend)>) -> String {
    let (target, dialect) = match target {
        Some((name, backend)) => (
            format!("'{name}' ({})", backend.dialect_name()),
            backend.dialect_name(),
        ),
        None => (
            "None. Tools that need a database will report that no connection is available; \
             tell the user to run /add or /switch."
                .to_string(),
            "standard SQL",
        ),
    };

    SYSTEM_PROMPT_TEMPLATE
        .replace("{target}", &target)
        .replace("{dialect}", dialect)
}

/// System prompt followed by the transcript as it should be sent.
pub fn build_messages(system_prompt: String, transcript: &Transcript) -> Vec<Message> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend(transcript.request_messages());
    messages
}
