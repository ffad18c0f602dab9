use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use termbridge::permissions::{PermissionCoordinator, PermissionResponder};
use termbridge::types::{
    PermissionDecision, PermissionOption, PermissionOptionKind, PermissionRequest, RequestId,
    ToolCallId,
};
use termbridge::{BridgeError, Result};

/// Records every decision it is asked to deliver
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(RequestId, PermissionDecision)>>,
    fail: bool,
}

impl PermissionResponder for Recorder {
    fn send_decision(&self, correlation_id: &RequestId, decision: &PermissionDecision) -> Result<()> {
        self.sent
            .lock()
            .push((correlation_id.clone(), decision.clone()));
        if self.fail {
            return Err(BridgeError::process_exited("agent gone"));
        }
        Ok(())
    }
}

fn request(id: u64, tool_call: &str) -> PermissionRequest {
    let option = |id: &str, kind| PermissionOption {
        option_id: id.to_string(),
        name: id.to_string(),
        kind,
    };
    PermissionRequest {
        correlation_id: RequestId::Number(id),
        tool_call_id: ToolCallId::new(tool_call),
        title: None,
        tool_call: json!({ "toolCallId": tool_call }),
        options: vec![
            option("allow", PermissionOptionKind::AllowOnce),
            option("deny", PermissionOptionKind::RejectOnce),
        ],
    }
}

fn coordinator() -> (PermissionCoordinator, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    (PermissionCoordinator::new(recorder.clone()), recorder)
}

#[test]
fn test_submit_then_resolve() {
    let (coordinator, recorder) = coordinator();
    assert!(!coordinator.is_pending());

    coordinator.submit(request(1, "tc1")).unwrap();
    assert!(coordinator.is_pending());
    assert_eq!(coordinator.pending(), Some(request(1, "tc1")));

    let resolved = coordinator
        .resolve(PermissionDecision::selected("allow"))
        .unwrap();
    assert_eq!(resolved.correlation_id, RequestId::Number(1));
    assert!(!coordinator.is_pending());
    assert_eq!(
        *recorder.sent.lock(),
        vec![(RequestId::Number(1), PermissionDecision::selected("allow"))]
    );
}

#[test]
fn test_second_submit_is_rejected() {
    let (coordinator, recorder) = coordinator();
    coordinator.submit(request(1, "tc1")).unwrap();

    let err = coordinator.submit(request(2, "tc2")).unwrap_err();
    assert!(matches!(err, BridgeError::PermissionAlreadyPending));
    assert_eq!(
        coordinator.pending().map(|r| r.correlation_id),
        Some(RequestId::Number(1))
    );
    assert!(recorder.sent.lock().is_empty());
}

#[test]
fn test_unknown_option_leaves_request_pending() {
    let (coordinator, recorder) = coordinator();
    coordinator.submit(request(1, "tc1")).unwrap();

    let err = coordinator
        .resolve(PermissionDecision::selected("sometimes"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownPermissionOption(ref id) if id == "sometimes"));
    assert!(coordinator.is_pending());
    assert!(recorder.sent.lock().is_empty());

    // Cancelled is always acceptable
    coordinator.resolve(PermissionDecision::Cancelled).unwrap();
    assert_eq!(recorder.sent.lock()[0].1, PermissionDecision::Cancelled);
}

#[test]
fn test_resolve_without_request() {
    let (coordinator, _) = coordinator();
    assert!(matches!(
        coordinator.resolve(PermissionDecision::Cancelled),
        Err(BridgeError::NoPendingPermission)
    ));
    assert!(coordinator.cancel_pending().is_none());
}

#[test]
fn test_resolve_if_matches_correlation_id() {
    let (coordinator, recorder) = coordinator();
    coordinator.submit(request(7, "tc1")).unwrap();

    assert!(
        coordinator
            .resolve_if(&RequestId::Number(6), PermissionDecision::Cancelled)
            .is_none()
    );
    assert!(coordinator.is_pending());

    let resolved = coordinator
        .resolve_if(&RequestId::Number(7), PermissionDecision::Cancelled)
        .unwrap();
    assert_eq!(resolved.tool_call_id.as_str(), "tc1");
    assert_eq!(recorder.sent.lock().len(), 1);
}

#[test]
fn test_cancel_pending_sends_cancelled_once() {
    let (coordinator, recorder) = coordinator();
    coordinator.submit(request(3, "tc1")).unwrap();

    assert!(coordinator.cancel_pending().is_some());
    assert!(coordinator.cancel_pending().is_none());
    assert_eq!(
        *recorder.sent.lock(),
        vec![(RequestId::Number(3), PermissionDecision::Cancelled)]
    );

    // The slot is free again
    coordinator.submit(request(4, "tc2")).unwrap();
}

#[test]
fn test_delivery_failure_still_clears_slot() {
    let recorder = Arc::new(Recorder {
        fail: true,
        ..Recorder::default()
    });
    let coordinator = PermissionCoordinator::new(recorder.clone());
    coordinator.submit(request(1, "tc1")).unwrap();

    coordinator
        .resolve(PermissionDecision::selected("deny"))
        .unwrap();
    assert!(!coordinator.is_pending());
    assert_eq!(recorder.sent.lock().len(), 1);
}

#[test]
fn test_decision_wire_format() {
    assert_eq!(
        serde_json::to_value(PermissionDecision::selected("allow")).unwrap(),
        json!({ "outcome": "selected", "optionId": "allow" })
    );
    assert_eq!(
        serde_json::to_value(PermissionDecision::Cancelled).unwrap(),
        json!({ "outcome": "cancelled" })
    );
}
