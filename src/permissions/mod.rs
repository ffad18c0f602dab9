//! Permission negotiation between the agent and the user
//!
//! The agent asks before running sensitive tools by sending
//! `session/request_permission`. The [`PermissionCoordinator`] parks that
//! request until the UI picks one of the offered options (or the turn is
//! cancelled), then answers the agent under the original correlation id.
//!
//! At most one request is pending at a time.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use termbridge::permissions::{PermissionCoordinator, PermissionResponder};
//! use termbridge::types::{PermissionDecision, PermissionRequest, RequestId};
//!
//! struct Print;
//! impl PermissionResponder for Print {
//!     fn send_decision(&self, id: &RequestId, decision: &PermissionDecision) -> termbridge::Result<()> {
//!         println!("{id}: {decision:?}");
//!         Ok(())
//!     }
//! }
//!
//! let coordinator = PermissionCoordinator::new(Arc::new(Print));
//! assert!(coordinator.pending().is_none());
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};
use crate::protocol::RequestPermissionResponse;
use crate::transport::AgentTransport;
use crate::types::{PermissionDecision, PermissionRequest, RequestId};

/// Delivers a decision back to the agent
pub trait PermissionResponder: Send + Sync {
    /// Answer the request identified by `correlation_id`
    ///
    /// # Errors
    /// Returns error if the answer cannot be delivered
    fn send_decision(&self, correlation_id: &RequestId, decision: &PermissionDecision) -> Result<()>;
}

impl PermissionResponder for AgentTransport {
    fn send_decision(&self, correlation_id: &RequestId, decision: &PermissionDecision) -> Result<()> {
        let result = serde_json::to_value(RequestPermissionResponse {
            outcome: decision.clone(),
        })?;
        self.respond(correlation_id, Ok(result))
    }
}

/// Single-slot holder for the outstanding permission request
pub struct PermissionCoordinator {
    slot: Mutex<Option<PermissionRequest>>,
    responder: Arc<dyn PermissionResponder>,
}

impl PermissionCoordinator {
    /// Create a coordinator answering through `responder`
    #[must_use]
    pub fn new(responder: Arc<dyn PermissionResponder>) -> Self {
        Self {
            slot: Mutex::new(None),
            responder,
        }
    }

    /// Park a new request
    ///
    /// # Errors
    /// Returns `PermissionAlreadyPending` if another request is outstanding;
    /// that request is left untouched
    pub fn submit(&self, request: PermissionRequest) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(BridgeError::PermissionAlreadyPending);
        }
        log::debug!(
            "Permission requested for tool call {} ({} options)",
            request.tool_call_id,
            request.options.len()
        );
        *slot = Some(request);
        Ok(())
    }

    /// The outstanding request, if any
    #[must_use]
    pub fn pending(&self) -> Option<PermissionRequest> {
        self.slot.lock().clone()
    }

    /// Whether a request is outstanding
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Answer the outstanding request and clear the slot
    ///
    /// A delivery failure (the agent already gone) is logged; the request
    /// still counts as resolved.
    ///
    /// # Errors
    /// Returns `NoPendingPermission` if nothing is outstanding, or
    /// `UnknownPermissionOption` if the chosen id was not offered
    pub fn resolve(&self, decision: PermissionDecision) -> Result<PermissionRequest> {
        let mut slot = self.slot.lock();
        let request = slot.as_ref().ok_or(BridgeError::NoPendingPermission)?;
        if let PermissionDecision::Selected { option_id } = &decision
            && request.option(option_id).is_none()
        {
            return Err(BridgeError::UnknownPermissionOption(option_id.clone()));
        }
        let request = slot.take().ok_or(BridgeError::NoPendingPermission)?;
        self.deliver(&request, &decision);
        Ok(request)
    }

    /// Resolve only if the outstanding request is `correlation_id`
    ///
    /// Used by expiry timers, which must not touch a newer request.
    pub fn resolve_if(
        &self,
        correlation_id: &RequestId,
        decision: PermissionDecision,
    ) -> Option<PermissionRequest> {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|r| &r.correlation_id) != Some(correlation_id) {
            return None;
        }
        let request = slot.take()?;
        self.deliver(&request, &decision);
        Some(request)
    }

    /// Resolve the outstanding request as cancelled, if there is one
    pub fn cancel_pending(&self) -> Option<PermissionRequest> {
        let request = self.slot.lock().take()?;
        self.deliver(&request, &PermissionDecision::Cancelled);
        Some(request)
    }

    fn deliver(&self, request: &PermissionRequest, decision: &PermissionDecision) {
        if let Err(e) = self
            .responder
            .send_decision(&request.correlation_id, decision)
        {
            if e.is_process_exit() {
                log::debug!("Agent gone before permission {} was answered", request.correlation_id);
                return;
            }
            log::warn!(
                "Could not deliver permission decision for {}: {}",
                request.correlation_id,
                e
            );
        }
    }
}

impl std::fmt::Debug for PermissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCoordinator")
            .field("pending", &*self.slot.lock())
            .field("responder", &"<responder>")
            .finish()
    }
}
