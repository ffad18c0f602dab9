use pretty_assertions::assert_eq;
use serde_json::json;

use termbridge::BridgeError;
use termbridge::protocol::{
    AgentCapabilities, ClientCapabilities, IncomingMessage, InitializeResponse, ProtocolHandler,
    RequestPermissionRequest, RpcError, SessionNotification, SessionUpdate, StopReason,
    response_frame,
};
use termbridge::types::{PermissionOptionKind, RequestId, ToolCallStatus, ToolKind};

#[test]
fn test_request_id_generation() {
    let handler = ProtocolHandler::new();
    let id1 = handler.next_id();
    let id2 = handler.next_id();
    assert_ne!(id1, id2);
    assert!(matches!(id1, RequestId::Number(_)));
}

#[test]
fn test_init_request_creation() {
    let handler = ProtocolHandler::new();
    let init_req = handler.create_init_request();
    assert_eq!(init_req.protocol_version, 1);
    assert_eq!(init_req.client_capabilities, ClientCapabilities::bridge_defaults());

    let wire = serde_json::to_value(&init_req).unwrap();
    assert_eq!(
        wire,
        json!({
            "protocolVersion": 1,
            "clientCapabilities": {
                "fs": { "readTextFile": false, "writeTextFile": false },
                "terminal": false
            }
        })
    );
}

#[test]
fn test_init_response_records_capabilities() {
    let handler = ProtocolHandler::new();
    assert!(!handler.is_initialized());

    let response: InitializeResponse = serde_json::from_value(json!({
        "protocolVersion": 1,
        "agentCapabilities": {
            "loadSession": true,
            "promptCapabilities": { "image": true, "embeddedContext": true },
            "mcpCapabilities": { "http": true }
        },
        "authMethods": [{ "id": "oauth", "name": "Log in" }]
    }))
    .unwrap();
    handler.handle_init_response(&response).unwrap();

    assert!(handler.is_initialized());
    assert_eq!(
        handler.agent_capabilities(),
        AgentCapabilities::LOAD_SESSION
            | AgentCapabilities::PROMPT_IMAGE
            | AgentCapabilities::PROMPT_EMBEDDED_CONTEXT
    );
}

#[test]
fn test_init_response_version_mismatch() {
    let handler = ProtocolHandler::new();
    let response: InitializeResponse =
        serde_json::from_value(json!({ "protocolVersion": 3 })).unwrap();
    let result = handler.handle_init_response(&response);
    assert!(matches!(result, Err(BridgeError::Protocol(_))));
    assert!(!handler.is_initialized());
}

#[tokio::test]
async fn test_register_and_resolve() {
    let handler = ProtocolHandler::new();
    let (id, rx) = handler.register().unwrap();
    assert_eq!(handler.pending_count(), 1);

    assert!(handler.resolve(&id, Ok(json!({ "sessionId": "s1" }))));
    assert_eq!(rx.await.unwrap().unwrap(), json!({ "sessionId": "s1" }));
    assert_eq!(handler.pending_count(), 0);

    // A second response for the same id finds nobody waiting
    assert!(!handler.resolve(&id, Ok(json!(null))));
}

#[tokio::test]
async fn test_resolve_with_error_object() {
    let handler = ProtocolHandler::new();
    let (id, rx) = handler.register().unwrap();
    handler.resolve(&id, Err(RpcError::internal("boom")));
    let err = rx.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Rpc { code: -32603, .. }), "{err:?}");
}

#[tokio::test]
async fn test_fail_all_completes_every_slot_once() {
    let handler = ProtocolHandler::new();
    let (_, rx1) = handler.register().unwrap();
    let (_, rx2) = handler.register().unwrap();
    let (forgotten, _rx3) = handler.register().unwrap();
    handler.forget(&forgotten);

    assert_eq!(handler.fail_all("agent process exited"), 2);
    assert!(rx1.await.unwrap().unwrap_err().is_process_exit());
    assert!(rx2.await.unwrap().unwrap_err().is_process_exit());

    // Closed handlers refuse new work
    let err = handler.register().unwrap_err();
    assert!(err.is_process_exit());
    assert_eq!(handler.fail_all("again"), 0);
}

#[test]
fn test_classifies_incoming_frames() {
    let request = IncomingMessage::from_value(json!({
        "jsonrpc": "2.0", "id": "abc", "method": "session/request_permission", "params": { "x": 1 }
    }))
    .unwrap();
    assert_eq!(
        request,
        IncomingMessage::Request {
            id: RequestId::Text("abc".to_string()),
            method: "session/request_permission".to_string(),
            params: json!({ "x": 1 }),
        }
    );

    let notification =
        IncomingMessage::from_value(json!({ "jsonrpc": "2.0", "method": "session/update" })).unwrap();
    assert_eq!(
        notification,
        IncomingMessage::Notification {
            method: "session/update".to_string(),
            params: serde_json::Value::Null,
        }
    );

    let response =
        IncomingMessage::from_value(json!({ "jsonrpc": "2.0", "id": 4, "result": { "ok": true } }))
            .unwrap();
    assert_eq!(
        response,
        IncomingMessage::Response {
            id: RequestId::Number(4),
            result: Ok(json!({ "ok": true })),
        }
    );

    let failure = IncomingMessage::from_value(json!({
        "jsonrpc": "2.0", "id": 5, "error": { "code": -32601, "message": "nope" }
    }))
    .unwrap();
    assert!(matches!(
        failure,
        IncomingMessage::Response { result: Err(RpcError { code: -32601, .. }), .. }
    ));
}

#[test]
fn test_rejects_unclassifiable_frames() {
    assert!(IncomingMessage::from_value(json!({ "jsonrpc": "2.0" })).is_err());
    assert!(IncomingMessage::from_value(json!({ "method": 12 })).is_err());
    assert!(IncomingMessage::from_value(json!([1, 2, 3])).is_err());
}

#[test]
fn test_response_frame_shapes() {
    let ok = response_frame(&RequestId::Number(1), Ok(json!({ "a": 1 })));
    assert_eq!(ok, json!({ "jsonrpc": "2.0", "id": 1, "result": { "a": 1 } }));

    let err = response_frame(
        &RequestId::Text("x".to_string()),
        Err(RpcError::method_not_found("fs/read_text_file")),
    );
    assert_eq!(
        err,
        json!({
            "jsonrpc": "2.0",
            "id": "x",
            "error": { "code": -32601, "message": "Method not found: fs/read_text_file" }
        })
    );
}

#[test]
fn test_session_update_variants() {
    let parse = |update: serde_json::Value| -> SessionUpdate {
        let notification: SessionNotification =
            serde_json::from_value(json!({ "sessionId": "s1", "update": update })).unwrap();
        assert_eq!(notification.session_id.as_str(), "s1");
        notification.update
    };

    let SessionUpdate::AgentMessageChunk { content } = parse(json!({
        "sessionUpdate": "agent_message_chunk",
        "content": { "type": "text", "text": "hi" }
    })) else {
        panic!("expected a message chunk");
    };
    assert_eq!(content.text.as_deref(), Some("hi"));

    let SessionUpdate::ToolCall(call) = parse(json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "tc1",
        "title": "Read file",
        "kind": "read",
        "status": "in_progress",
        "rawInput": { "path": "a.rs" }
    })) else {
        panic!("expected a tool call");
    };
    assert_eq!(call.tool_call_id.as_str(), "tc1");
    assert_eq!(call.kind, ToolKind::Read);
    assert_eq!(call.status, ToolCallStatus::InProgress);

    let SessionUpdate::ToolCallUpdate(update) = parse(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "tc1",
        "status": "failed"
    })) else {
        panic!("expected a tool call update");
    };
    assert_eq!(update.status, Some(ToolCallStatus::Failed));
    assert_eq!(update.title, None);

    assert_eq!(
        parse(json!({ "sessionUpdate": "available_commands_update", "availableCommands": [] })),
        SessionUpdate::Unknown
    );
}

#[test]
fn test_tool_call_defaults_for_missing_fields() {
    let SessionUpdate::ToolCall(call) = serde_json::from_value(json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "bare"
    }))
    .unwrap() else {
        panic!("expected a tool call");
    };
    assert_eq!(call.title, "");
    assert_eq!(call.kind, ToolKind::Other);
    assert_eq!(call.status, ToolCallStatus::Pending);
}

#[test]
fn test_permission_request_parsing() {
    let request: RequestPermissionRequest = serde_json::from_value(json!({
        "sessionId": "s1",
        "toolCall": { "toolCallId": "tc3", "title": "Write config", "kind": "edit" },
        "options": [
            { "optionId": "ok", "name": "Allow", "kind": "allow_once" },
            { "optionId": "never", "name": "Never", "kind": "reject_always" }
        ]
    }))
    .unwrap();
    let reference = request.tool_call_ref().unwrap();
    assert_eq!(reference.tool_call_id.as_str(), "tc3");
    assert_eq!(reference.title.as_deref(), Some("Write config"));
    assert_eq!(request.options[1].kind, PermissionOptionKind::RejectAlways);

    let missing_id: RequestPermissionRequest = serde_json::from_value(json!({
        "sessionId": "s1",
        "toolCall": { "title": "anonymous" },
        "options": []
    }))
    .unwrap();
    assert!(missing_id.tool_call_ref().is_err());
}

#[test]
fn test_unknown_stop_reason_is_tolerated() {
    let reason: StopReason = serde_json::from_value(json!("budget_exhausted")).unwrap();
    assert_eq!(reason, StopReason::Other);
    let reason: StopReason = serde_json::from_value(json!("refusal")).unwrap();
    assert_eq!(reason, StopReason::Refusal);
}
