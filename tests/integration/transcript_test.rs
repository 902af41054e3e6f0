//! Transcript shape and stream assembly properties.

use super::common::{settle, TestRegistry};
use dbsage::db::MockDatabaseClient;
use dbsage::llm::{ChatDelta, Message, Role, ScriptStep, ScriptedLlmClient, StreamAssembler};
use dbsage::tools::{GET_ALL_TABLES, GET_TABLE_SCHEMA};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Every assistant message with N tool calls is followed by N tool messages
/// answering them in order.
fn assert_tool_pairs(messages: &[Message]) {
    for (i, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant || message.tool_calls.is_empty() {
            continue;
        }
        let responses = &messages[i + 1..i + 1 + message.tool_calls.len()];
        for (call, response) in message.tool_calls.iter().zip(responses) {
            assert_eq!(response.role, Role::Tool);
            assert_eq!(response.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
    }
}

#[tokio::test]
async fn test_multi_step_turn_keeps_tool_pairs() {
    let env = TestRegistry::new();
    env.add(
        "main",
        MockDatabaseClient::new().with_table("users", &["id", "email"]),
    )
    .await;
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_script(vec![ScriptStep::tool_call("c1", GET_ALL_TABLES, "{}")])
            .with_script(vec![
                ScriptStep::text("Looking at users."),
                ScriptStep::tool_call("c2", GET_TABLE_SCHEMA, r#"{"tableName":"users"}"#),
            ])
            .with_text(&["users has id and email."]),
    );
    let (mut orch, mut rx) = env.orchestrator(Arc::clone(&llm));

    orch.submit("describe my data").unwrap();
    settle(&mut orch, &mut rx).await;

    let messages = orch.transcript().messages();
    let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );
    assert_tool_pairs(messages);
    assert_eq!(llm.request_count(), 3);
}

fn assemble(deltas: Vec<ChatDelta>) -> Message {
    let mut assembler = StreamAssembler::new();
    for delta in deltas {
        assembler.push(delta);
    }
    assembler.finish()
}

#[test]
fn test_assembly_is_independent_of_split_points() {
    let text = "Found 3 tables: users, orders, événements";
    let args = r#"{"sql":"SELECT count(*) FROM orders"}"#;

    let expected = assemble(vec![
        ChatDelta::text(text),
        ChatDelta::tool(0, Some("c1"), Some("execute_sql"), args),
    ]);

    let text_splits: Vec<usize> = (0..=text.len())
        .filter(|&i| text.is_char_boundary(i))
        .collect();
    for &t in &text_splits {
        for a in 0..=args.len() {
            let got = assemble(vec![
                ChatDelta::text(&text[..t]),
                ChatDelta::tool(0, Some("c1"), Some("execute_sql"), &args[..a]),
                ChatDelta::text(&text[t..]),
                ChatDelta::tool(0, None, None, &args[a..]),
            ]);
            assert_eq!(got, expected, "split at text {t}, args {a}");
        }
    }
}
