//! End-to-end turns against a scripted model and mock databases.

use super::common::{settle, streamed_text, TestRegistry};
use dbsage::commands::{execute, Command, CommandContext};
use dbsage::db::MockDatabaseClient;
use dbsage::llm::{ChatDelta, Message, Role, ScriptStep, ScriptedLlmClient};
use dbsage::orchestrator::{TurnOutcome, TurnState, TurnUpdate};
use dbsage::tools::{EXECUTE_SQL, GET_ALL_TABLES};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_plain_answer_without_tools() {
    let env = TestRegistry::new();
    let llm = Arc::new(ScriptedLlmClient::new().with_text(&["hi", " there"]));
    let (mut orch, mut rx) = env.orchestrator(Arc::clone(&llm));

    assert_ok!(orch.submit("hello"));
    let updates = settle(&mut orch, &mut rx).await;

    assert_eq!(streamed_text(&updates), "hi there");
    assert_eq!(
        updates.last(),
        Some(&TurnUpdate::Finished(TurnOutcome::Completed))
    );
    assert_eq!(
        orch.transcript().messages(),
        &[Message::user("hello"), Message::assistant("hi there")]
    );
    assert_eq!(orch.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_safe_tool_runs_without_confirmation() {
    let env = TestRegistry::new();
    let db = env
        .add("main", MockDatabaseClient::new().with_table("users", &["id", "email"]))
        .await;
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_script(vec![ScriptStep::tool_call("call_1", GET_ALL_TABLES, "{}")])
            .with_text(&["Your database has 1 table: users."]),
    );
    let (mut orch, mut rx) = env.orchestrator(Arc::clone(&llm));

    assert_ok!(orch.submit("list tables"));
    let updates = settle(&mut orch, &mut rx).await;

    assert!(!updates
        .iter()
        .any(|u| matches!(u, TurnUpdate::ConfirmationRequested { .. })));
    assert_eq!(db.call_count("get_all_tables"), 1);

    let messages = orch.transcript().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].role, Role::Tool);
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    let body: Value = serde_json::from_str(&messages[2].content).unwrap();
    assert_eq!(body[0]["name"], "users");
    assert_eq!(
        messages[3],
        Message::assistant("Your database has 1 table: users.")
    );

    // The follow-up request carries the tool result.
    let second = &llm.requests()[1];
    assert!(second.messages.iter().any(|m| m.role == Role::Tool));
}

#[tokio::test]
async fn test_risky_tool_approved() {
    let env = TestRegistry::new();
    let db = env.add("main", MockDatabaseClient::new()).await;
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_script(vec![ScriptStep::tool_call(
                "call_1",
                EXECUTE_SQL,
                r#"{"sql":"DELETE FROM t"}"#,
            )])
            .with_text(&["Deleted 1 row."]),
    );
    let (mut orch, mut rx) = env.orchestrator(llm);

    assert_ok!(orch.submit("delete from t"));
    let updates = settle(&mut orch, &mut rx).await;

    let Some(TurnUpdate::ConfirmationRequested { tool, prompt, .. }) = updates.last() else {
        panic!("expected a confirmation request, got {updates:?}");
    };
    assert_eq!(tool, EXECUTE_SQL);
    assert!(prompt.contains("DELETE FROM t"));
    assert_eq!(orch.state(), TurnState::WaitingConfirm);
    assert!(orch.pending_confirmation().is_some());
    assert_eq!(db.call_count("execute_sql"), 0);

    let started = orch.resume(true).await.unwrap();
    assert!(matches!(started[0], TurnUpdate::ToolStarted { .. }));
    let updates = settle(&mut orch, &mut rx).await;

    assert_eq!(db.call_count("execute_sql"), 1);
    assert!(orch.pending_confirmation().is_none());
    assert_eq!(streamed_text(&updates), "Deleted 1 row.");
    assert_eq!(
        orch.transcript().last(),
        Some(&Message::assistant("Deleted 1 row."))
    );
}

#[tokio::test]
async fn test_risky_tool_declined() {
    let env = TestRegistry::new();
    let db = env.add("main", MockDatabaseClient::new()).await;
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_script(vec![ScriptStep::tool_call(
                "call_1",
                EXECUTE_SQL,
                r#"{"sql":"DELETE FROM t"}"#,
            )])
            .with_text(&["ok"]),
    );
    let (mut orch, mut rx) = env.orchestrator(Arc::clone(&llm));

    assert_ok!(orch.submit("delete from t"));
    settle(&mut orch, &mut rx).await;

    let updates = orch.resume(false).await.unwrap();
    assert_eq!(updates, vec![TurnUpdate::Finished(TurnOutcome::Declined)]);
    assert_eq!(db.call_count("execute_sql"), 0);
    assert_eq!(orch.state(), TurnState::Idle);

    let last = orch.transcript().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.tool_calls[0].id, "call_1");

    // The next turn is accepted and the dangling call is answered in the
    // request only.
    assert_ok!(orch.submit("never mind"));
    settle(&mut orch, &mut rx).await;
    let request = &llm.requests()[1];
    assert!(request
        .messages
        .iter()
        .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some("call_1")));
    assert_eq!(
        orch.transcript()
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .count(),
        0
    );
}

#[tokio::test]
async fn test_switch_mid_session_uses_new_handle() {
    let env = TestRegistry::new();
    let a = env.add("alpha", MockDatabaseClient::new().with_table("a_only", &["id"])).await;
    let b = env.add("beta", MockDatabaseClient::new().with_table("b_only", &["id"])).await;
    assert_eq!(env.registry.current_name().await.as_deref(), Some("alpha"));

    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_script(vec![ScriptStep::tool_call("call_1", GET_ALL_TABLES, "{}")])
            .with_text(&["beta has b_only"]),
    );
    let (mut orch, mut rx) = env.orchestrator(llm);

    let ctx = CommandContext {
        registry: &env.registry,
    };
    execute(Command::Switch("beta".into()), &ctx).await;
    assert_eq!(env.registry.current_name().await.as_deref(), Some("beta"));

    assert_ok!(orch.submit("what tables?"));
    settle(&mut orch, &mut rx).await;

    assert_eq!(b.call_count("get_all_tables"), 1);
    assert_eq!(a.call_count("get_all_tables"), 0);
    assert!(orch.transcript().messages()[2].content.contains("b_only"));

    let saved = env.store().load().unwrap();
    let beta = &saved["beta"];
    assert!(beta.last_used.is_some());
    assert!(beta.last_used_at() >= saved["alpha"].last_used_at());
}

#[tokio::test]
async fn test_stream_error_mid_tool_arguments() {
    let env = TestRegistry::new();
    let db = env.add("main", MockDatabaseClient::new()).await;
    let llm = Arc::new(ScriptedLlmClient::new().with_script(vec![
        ScriptStep::Delta(ChatDelta::tool(
            0,
            Some("call_1"),
            Some(EXECUTE_SQL),
            r#"{"sql": "SEL"#,
        )),
        ScriptStep::tool_args(0, "ECT * FR"),
        ScriptStep::error("connection reset by peer"),
    ]));
    let (mut orch, mut rx) = env.orchestrator(llm);

    assert_ok!(orch.submit("show everything"));
    let updates = settle(&mut orch, &mut rx).await;

    match updates.last() {
        Some(TurnUpdate::Finished(TurnOutcome::Failed(message))) => {
            assert!(message.contains("connection reset by peer"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(db.calls().is_empty());
    assert!(orch.transcript().is_empty());
    assert_eq!(orch.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_failure_keeps_resolved_tool_exchange() {
    let env = TestRegistry::new();
    env.add("main", MockDatabaseClient::new().with_table("users", &["id"]))
        .await;
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .with_script(vec![ScriptStep::tool_call("call_1", GET_ALL_TABLES, "{}")])
            .with_script(vec![ScriptStep::text("There"), ScriptStep::error("timeout")]),
    );
    let (mut orch, mut rx) = env.orchestrator(llm);

    assert_ok!(orch.submit("tables?"));
    settle(&mut orch, &mut rx).await;

    let roles: Vec<_> = orch.transcript().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
}
