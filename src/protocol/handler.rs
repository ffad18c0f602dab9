//! Correlation of outbound requests with their responses

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{BridgeError, Result};
use crate::types::RequestId;

use super::capabilities::{AgentCapabilities, ClientCapabilities};
use super::messages::{InitializeRequest, InitializeResponse, PROTOCOL_VERSION, RpcError};

/// Slot waiting for the response to one request
type PendingSlot = oneshot::Sender<Result<Value>>;

/// Protocol handler for the agent connection
///
/// Allocates request ids and keeps one pending slot per outstanding request.
/// Every slot is completed exactly once: by its response, by
/// [`fail_all`](Self::fail_all) when the connection ends, or removed by
/// [`forget`](Self::forget) when the caller gave up.
pub struct ProtocolHandler {
    /// Request ID counter
    next_request_id: AtomicU64,
    /// Pending requests awaiting responses
    pending_requests: Mutex<HashMap<RequestId, PendingSlot>>,
    /// Set once the handshake succeeded
    initialized: AtomicBool,
    /// Set once the connection is gone; later registrations fail immediately
    closed: Mutex<Option<String>>,
    /// What the agent reported during the handshake
    agent_capabilities: Mutex<AgentCapabilities>,
}

impl ProtocolHandler {
    /// Create a new protocol handler
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicU64::new(1),
            pending_requests: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            closed: Mutex::new(None),
            agent_capabilities: Mutex::new(AgentCapabilities::empty()),
        }
    }

    /// Check if the handshake completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Generate next request ID
    #[must_use]
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocate an id and a slot for its response
    ///
    /// # Errors
    /// Returns `ProcessExited` if the connection already ended
    pub fn register(&self) -> Result<(RequestId, oneshot::Receiver<Result<Value>>)> {
        // Held across the insert so fail_all cannot slip in between
        let closed = self.closed.lock();
        if let Some(reason) = closed.as_ref() {
            return Err(BridgeError::process_exited(reason.clone()));
        }
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Complete the slot for `id`; returns false if nobody was waiting
    pub fn resolve(&self, id: &RequestId, result: std::result::Result<Value, RpcError>) -> bool {
        let slot = self.pending_requests.lock().remove(id);
        match slot {
            Some(tx) => {
                let _ = tx.send(result.map_err(BridgeError::from));
                true
            }
            None => false,
        }
    }

    /// Drop the slot for `id` without completing it
    pub fn forget(&self, id: &RequestId) {
        self.pending_requests.lock().remove(id);
    }

    /// Fail every outstanding request and refuse new ones
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let mut closed = self.closed.lock();
        if closed.is_none() {
            *closed = Some(reason.to_string());
        }
        self.initialized.store(false, Ordering::SeqCst);
        let drained: Vec<_> = self.pending_requests.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(BridgeError::process_exited(reason)));
        }
        count
    }

    /// Number of requests awaiting a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_requests.lock().len()
    }

    /// Create initialization request
    #[must_use]
    pub fn create_init_request(&self) -> InitializeRequest {
        InitializeRequest {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::bridge_defaults(),
        }
    }

    /// Handle initialization response
    ///
    /// # Errors
    /// Returns error if protocol version is unsupported
    pub fn handle_init_response(&self, response: &InitializeResponse) -> Result<()> {
        if response.protocol_version != PROTOCOL_VERSION {
            return Err(BridgeError::protocol(format!(
                "Unsupported protocol version: {} (expected {PROTOCOL_VERSION})",
                response.protocol_version
            )));
        }

        *self.agent_capabilities.lock() = response.agent_capabilities;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Capabilities reported by the agent
    #[must_use]
    pub fn agent_capabilities(&self) -> AgentCapabilities {
        *self.agent_capabilities.lock()
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}
