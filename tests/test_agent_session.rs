//! Integration tests for the agent session state machine
//!
//! Every test drives a scripted in-memory agent through the real transport.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{Harness, permission_params};
use termbridge::agent::{AgentActivity, AgentState, SessionPolicy, TurnResult};
use termbridge::protocol::StopReason;
use termbridge::types::{
    AgentUpdate, BridgeEvent, ContextSnapshot, PermissionDecision, RequestId, TerminalId,
    ToolCallStatus, ToolKind,
};
use termbridge::BridgeError;

fn states(events: &[BridgeEvent]) -> Vec<AgentState> {
    events
        .iter()
        .filter_map(|event| match event {
            BridgeEvent::AgentStateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_start_reaches_ready() {
    let mut h = Harness::new(SessionPolicy::default());
    let manager = Arc::clone(&h.manager);
    let started = tokio::spawn(async move { manager.start(Path::new("/repo")).await });

    let mut agent = h.agents.recv().await.unwrap();
    let params = agent.accept_session("s1").await;
    assert_eq!(params, json!({ "cwd": "/repo", "mcpServers": [] }));

    let id = started.await.unwrap().unwrap();
    assert_eq!(id.as_str(), "s1");
    assert_eq!(states(&h.drain_events()), vec![AgentState::Starting, AgentState::Ready]);

    let status = h.manager.status();
    assert_eq!(status.status, AgentActivity::Active);
    assert_eq!(status.state, AgentState::Ready);
    assert_eq!(status.workspace.as_deref(), Some(Path::new("/repo")));
}

#[tokio::test]
async fn test_start_failure_reverts_to_idle() {
    let mut h = Harness::new(SessionPolicy::default());
    let manager = Arc::clone(&h.manager);
    let started = tokio::spawn(async move { manager.start(Path::new("/repo")).await });

    let mut agent = h.agents.recv().await.unwrap();
    agent.accept_initialize().await;
    let (id, _) = agent.expect_request("session/new").await;
    agent.respond_error(&id, -32000, "workspace not trusted").await;

    let err = started.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Rpc { code: -32000, .. }), "{err:?}");
    agent.expect_closed().await;

    assert_eq!(states(&h.drain_events()), vec![AgentState::Starting, AgentState::Idle]);
    assert_eq!(h.manager.status().status, AgentActivity::Idle);
}

#[tokio::test]
async fn test_tool_call_created_then_completed() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;
    let session = h.manager.current().unwrap();

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("list files", vec![]).await });

    let (prompt_id, params) = agent.expect_request("session/prompt").await;
    assert_eq!(params["sessionId"], json!("s1"));
    assert_eq!(params["prompt"], json!([{ "type": "text", "text": "list files" }]));
    assert_eq!(session.state(), AgentState::Prompting);

    agent
        .update(
            "s1",
            json!({ "sessionUpdate": "tool_call", "toolCallId": "tc1", "title": "ls", "kind": "execute", "status": "pending" }),
        )
        .await;
    h.next_event(|e| {
        matches!(e, BridgeEvent::AgentUpdate { update: AgentUpdate::ToolCallCreated { .. } })
    })
    .await;

    let calls = session.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, ToolKind::Execute);
    assert_eq!(calls[0].status, ToolCallStatus::Pending);
    assert_eq!(calls[0].raw_output, None);

    agent
        .update(
            "s1",
            json!({ "sessionUpdate": "tool_call_update", "toolCallId": "tc1", "status": "completed", "rawOutput": { "stdout": "a\nb" } }),
        )
        .await;
    agent
        .update(
            "s1",
            json!({ "sessionUpdate": "agent_message_chunk", "content": { "type": "text", "text": "two files" } }),
        )
        .await;
    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;

    let result = turn.await.unwrap().unwrap();
    assert_eq!(
        result,
        TurnResult {
            stop_reason: StopReason::EndTurn,
            text: "two files".to_string(),
        }
    );

    let calls = session.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, ToolCallStatus::Completed);
    assert_eq!(calls[0].raw_output, Some(json!({ "stdout": "a\nb" })));
    assert_eq!(session.state(), AgentState::Ready);
}

#[tokio::test]
async fn test_unknown_tool_call_update_is_dropped() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("hi", vec![]).await });
    let (prompt_id, _) = agent.expect_request("session/prompt").await;

    agent
        .update(
            "s1",
            json!({ "sessionUpdate": "tool_call_update", "toolCallId": "ghost", "status": "failed" }),
        )
        .await;
    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;
    turn.await.unwrap().unwrap();

    assert!(h.manager.current().unwrap().tool_calls().is_empty());
    let updates = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, BridgeEvent::AgentUpdate { .. }))
        .count();
    assert_eq!(updates, 0);
}

#[tokio::test]
async fn test_permission_round_trip() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;
    let session = h.manager.current().unwrap();

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("clean the build", vec![]).await });
    let (prompt_id, _) = agent.expect_request("session/prompt").await;

    agent
        .request(json!(100), "session/request_permission", permission_params("s1", "tc9"))
        .await;
    let event = h
        .next_event(|e| matches!(e, BridgeEvent::PermissionRequested { .. }))
        .await;
    let BridgeEvent::PermissionRequested { request } = event else {
        unreachable!()
    };
    assert_eq!(request.correlation_id, RequestId::Number(100));
    assert_eq!(request.tool_call_id.as_str(), "tc9");
    assert_eq!(request.title.as_deref(), Some("Run rm -rf build"));
    assert_eq!(request.options.len(), 3);

    assert_eq!(session.state(), AgentState::AwaitingPermission);
    assert_eq!(h.manager.status().pending_permission, Some(request));

    h.manager
        .respond_permission(PermissionDecision::selected("allow"))
        .unwrap();
    let response = agent.expect_response(&json!(100)).await;
    assert_eq!(
        response["result"],
        json!({ "outcome": { "outcome": "selected", "optionId": "allow" } })
    );
    assert_eq!(session.state(), AgentState::Prompting);
    assert!(session.pending_permission().is_none());

    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;
    let result = turn.await.unwrap().unwrap();
    assert_eq!(result.stop_reason, StopReason::EndTurn);
    assert_eq!(session.state(), AgentState::Ready);
}

#[tokio::test]
async fn test_second_permission_request_is_rejected() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("go", vec![]).await });
    let (prompt_id, _) = agent.expect_request("session/prompt").await;

    agent
        .request(json!(1), "session/request_permission", permission_params("s1", "tc1"))
        .await;
    h.next_event(|e| matches!(e, BridgeEvent::PermissionRequested { .. }))
        .await;

    agent
        .request(json!(2), "session/request_permission", permission_params("s1", "tc2"))
        .await;
    let rejected = agent.expect_response(&json!(2)).await;
    assert_eq!(rejected["error"]["code"], json!(-32603));

    // The first request is untouched and still resolvable
    let pending = h.manager.current().unwrap().pending_permission().unwrap();
    assert_eq!(pending.tool_call_id.as_str(), "tc1");

    let err = h
        .manager
        .respond_permission(PermissionDecision::selected("maybe"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownPermissionOption(ref id) if id == "maybe"));

    h.manager
        .respond_permission(PermissionDecision::selected("reject"))
        .unwrap();
    let answered = agent.expect_response(&json!(1)).await;
    assert_eq!(answered["result"]["outcome"]["optionId"], json!("reject"));

    let err = h
        .manager
        .respond_permission(PermissionDecision::Cancelled)
        .unwrap_err();
    assert!(matches!(err, BridgeError::NoPendingPermission));

    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;
    turn.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_cancels_pending_permission() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("delete it", vec![]).await });
    agent.expect_request("session/prompt").await;

    agent
        .request(json!(7), "session/request_permission", permission_params("s1", "tc1"))
        .await;
    h.next_event(|e| matches!(e, BridgeEvent::PermissionRequested { .. }))
        .await;

    h.manager.stop().await;

    let answered = agent.expect_response(&json!(7)).await;
    assert_eq!(answered["result"], json!({ "outcome": { "outcome": "cancelled" } }));
    agent.expect_closed().await;

    let err = turn.await.unwrap().unwrap_err();
    assert!(err.is_process_exit(), "{err:?}");

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        BridgeEvent::PermissionResolved { decision: PermissionDecision::Cancelled, .. }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, BridgeEvent::AgentStopped { .. })));
    assert_eq!(h.manager.status().status, AgentActivity::Idle);
    assert!(matches!(
        h.manager.prompt("again", vec![]).await,
        Err(BridgeError::NoActiveSession)
    ));

    // Idempotent
    h.manager.stop().await;
}

#[tokio::test]
async fn test_cancel_resolves_turn_as_cancelled() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;
    let session = h.manager.current().unwrap();

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("long task", vec![]).await });
    let (prompt_id, _) = agent.expect_request("session/prompt").await;

    agent
        .update(
            "s1",
            json!({ "sessionUpdate": "agent_message_chunk", "content": { "type": "text", "text": "partial" } }),
        )
        .await;
    h.next_event(|e| {
        matches!(e, BridgeEvent::AgentUpdate { update: AgentUpdate::MessageChunk { .. } })
    })
    .await;

    h.manager.cancel().unwrap();
    let notice = agent.expect_notification("session/cancel").await;
    assert_eq!(notice, json!({ "sessionId": "s1" }));

    let result = turn.await.unwrap().unwrap();
    assert_eq!(
        result,
        TurnResult {
            stop_reason: StopReason::Cancelled,
            text: "partial".to_string(),
        }
    );
    assert_eq!(session.state(), AgentState::Ready);

    // A late answer to the cancelled prompt is ignored and the session stays usable
    agent.respond(&prompt_id, json!({ "stopReason": "cancelled" })).await;
    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("next", vec![]).await });
    let (next_id, _) = agent.expect_request("session/prompt").await;
    assert_ne!(next_id, prompt_id);
    agent.respond(&next_id, json!({ "stopReason": "end_turn" })).await;
    assert_eq!(turn.await.unwrap().unwrap().stop_reason, StopReason::EndTurn);
}

#[tokio::test]
async fn test_state_misuse_is_reported() {
    let mut h = Harness::new(SessionPolicy::default());
    assert!(matches!(h.manager.cancel(), Err(BridgeError::NoActiveSession)));
    assert!(matches!(
        h.manager.prompt("hi", vec![]).await,
        Err(BridgeError::NoActiveSession)
    ));

    let _agent = h.start("/repo", "s1").await;
    let err = h.manager.cancel().unwrap_err();
    assert!(
        matches!(err, BridgeError::InvalidState { operation: "cancel", .. }),
        "{err:?}"
    );
    let err = h
        .manager
        .respond_permission(PermissionDecision::Cancelled)
        .unwrap_err();
    assert!(matches!(err, BridgeError::NoPendingPermission));
}

#[tokio::test]
async fn test_prompt_while_prompting_is_rejected() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("first", vec![]).await });
    let (prompt_id, _) = agent.expect_request("session/prompt").await;

    let err = h.manager.prompt("second", vec![]).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidState { operation: "prompt", .. }));

    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;
    turn.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_start_replaces_existing_session() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut first = h.start("/a", "s1").await;
    h.drain_events();

    let manager = Arc::clone(&h.manager);
    let started = tokio::spawn(async move { manager.start(Path::new("/b")).await });

    // The old agent is disconnected before the new one is launched
    first.expect_closed().await;
    let mut second = h.agents.recv().await.unwrap();
    second.accept_session("s2").await;
    assert_eq!(started.await.unwrap().unwrap().as_str(), "s2");

    let events = h.drain_events();
    let stopped = events
        .iter()
        .position(|e| matches!(e, BridgeEvent::AgentStopped { .. }))
        .unwrap();
    let starting = events
        .iter()
        .position(|e| matches!(e, BridgeEvent::AgentStateChanged { state: AgentState::Starting }))
        .unwrap();
    assert!(stopped < starting);
    assert_eq!(h.manager.current().unwrap().id().as_str(), "s2");
}

#[tokio::test]
async fn test_agent_exit_stops_session() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("hello", vec![]).await });
    agent.expect_request("session/prompt").await;

    agent.exit().await;

    let err = turn.await.unwrap().unwrap_err();
    assert!(err.is_process_exit(), "{err:?}");
    let event = h
        .next_event(|e| matches!(e, BridgeEvent::AgentStopped { .. }))
        .await;
    let BridgeEvent::AgentStopped { reason } = event else {
        unreachable!()
    };
    assert_eq!(reason, "agent process exited");
    assert_eq!(h.manager.status().status, AgentActivity::Idle);
}

#[tokio::test]
async fn test_unrouted_agent_request_gets_method_not_found() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;

    agent
        .request(json!("fs-1"), "fs/read_text_file", json!({ "sessionId": "s1", "path": "/etc/hosts" }))
        .await;
    let response = agent.expect_response(&json!("fs-1")).await;
    assert_eq!(response["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let mut h = Harness::new(SessionPolicy::default());
    let mut agent = h.start("/repo", "s1").await;

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("hi", vec![]).await });
    let (prompt_id, _) = agent.expect_request("session/prompt").await;

    agent.send_raw("this is not json\n\n{\"jsonrpc\":\"2.0\"}\n").await;
    // A frame split across two writes is reassembled
    agent
        .send_raw(r#"{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"s1","update":{"sessionUpdate":"agent_message_chunk","#)
        .await;
    agent
        .send_raw(r#""content":{"type":"text","text":"still here"}}}}"#)
        .await;
    agent.send_raw("\r\n").await;
    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;

    let result = turn.await.unwrap().unwrap();
    assert_eq!(result.text, "still here");
}

#[tokio::test]
async fn test_context_snapshots_are_embedded() {
    let policy = SessionPolicy {
        context_limit: Some(5),
        ..SessionPolicy::default()
    };
    let mut h = Harness::new(policy);
    let mut agent = h.start("/repo", "s1").await;

    let manager = Arc::clone(&h.manager);
    let snapshot = ContextSnapshot::new(TerminalId::from("t1"), "hello world");
    let turn = tokio::spawn(async move { manager.prompt("what happened?", vec![snapshot]).await });

    let (prompt_id, params) = agent.expect_request("session/prompt").await;
    assert_eq!(
        params["prompt"],
        json!([
            { "type": "text", "text": "what happened?" },
            { "type": "resource", "resource": { "uri": "terminal://t1", "mimeType": "text/plain", "text": "world" } }
        ])
    );
    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;
    turn.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_permission_timeout_cancels_request() {
    let policy = SessionPolicy {
        permission_timeout: Some(Duration::from_millis(50)),
        ..SessionPolicy::default()
    };
    let mut h = Harness::new(policy);
    let mut agent = h.start("/repo", "s1").await;
    let session = h.manager.current().unwrap();

    let manager = Arc::clone(&h.manager);
    let turn = tokio::spawn(async move { manager.prompt("go", vec![]).await });
    let (prompt_id, _) = agent.expect_request("session/prompt").await;

    agent
        .request(json!(3), "session/request_permission", permission_params("s1", "tc1"))
        .await;
    let answered = agent.expect_response(&json!(3)).await;
    assert_eq!(answered["result"]["outcome"]["outcome"], json!("cancelled"));
    h.next_event(|e| matches!(e, BridgeEvent::PermissionResolved { .. }))
        .await;
    assert_eq!(session.state(), AgentState::Prompting);

    agent.respond(&prompt_id, json!({ "stopReason": "end_turn" })).await;
    turn.await.unwrap().unwrap();
}
