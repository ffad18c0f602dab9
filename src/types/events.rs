//! Events pushed from the core to the UI

use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::identifiers::{RequestId, TerminalId};
use super::permissions::{PermissionDecision, PermissionRequest};
use super::tool_calls::ToolCall;
use crate::agent::AgentState;

/// Everything the core reports without being asked
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum BridgeEvent {
    /// The bridge process is up and reading commands
    #[serde(rename = "bridge.ready")]
    Ready {
        /// Fresh per process, so a UI can tell a restarted bridge apart
        #[serde(rename = "instanceId")]
        instance_id: Uuid,
        /// Crate version
        version: &'static str,
    },
    /// Output from a terminal, in emission order
    #[serde(rename = "terminal.data")]
    TerminalData {
        /// Terminal id
        id: TerminalId,
        /// Raw output bytes
        #[serde(serialize_with = "lossy_utf8")]
        data: Vec<u8>,
    },
    /// Shell process exited
    #[serde(rename = "terminal.exit")]
    TerminalExit {
        /// Terminal id
        id: TerminalId,
        /// Exit code, if the platform reported one
        code: Option<u32>,
    },
    /// Derived window title changed
    #[serde(rename = "terminal.title")]
    TerminalTitle {
        /// Terminal id
        id: TerminalId,
        /// New title
        title: String,
    },
    /// The last remaining terminal was respawned in place
    #[serde(rename = "terminal.restarted")]
    TerminalRestarted {
        /// Terminal id (unchanged)
        id: TerminalId,
    },
    /// Streaming progress from the agent
    #[serde(rename = "agent.update")]
    AgentUpdate {
        /// Update payload
        update: AgentUpdate,
    },
    /// The agent is waiting for a permission decision
    #[serde(rename = "agent.permissionRequest")]
    PermissionRequested {
        /// Request details
        request: PermissionRequest,
    },
    /// A pending permission request was answered
    #[serde(rename = "agent.permissionResolved")]
    PermissionResolved {
        /// Correlation id of the answered request
        #[serde(rename = "correlationId")]
        correlation_id: RequestId,
        /// Decision sent to the agent
        decision: PermissionDecision,
    },
    /// Agent session state changed
    #[serde(rename = "agent.state")]
    AgentStateChanged {
        /// New state
        state: AgentState,
    },
    /// Agent session ended
    #[serde(rename = "agent.stopped")]
    AgentStopped {
        /// Why it ended
        reason: String,
    },
}

/// Streaming agent updates
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AgentUpdate {
    /// Piece of the assistant's reply
    MessageChunk {
        /// Text fragment
        text: String,
    },
    /// Piece of the agent's visible reasoning
    ThoughtChunk {
        /// Text fragment
        text: String,
    },
    /// A new tool call was registered
    ToolCallCreated {
        /// Snapshot after the change
        #[serde(rename = "toolCall")]
        tool_call: ToolCall,
    },
    /// An existing tool call changed
    ToolCallUpdated {
        /// Snapshot after the change
        #[serde(rename = "toolCall")]
        tool_call: ToolCall,
    },
    /// The agent published or replaced its plan
    Plan {
        /// Plan entries as sent by the agent
        entries: serde_json::Value,
    },
}

fn lossy_utf8<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

/// Sending half of the UI event stream
///
/// Emission never blocks and never fails; once the receiver is gone events
/// are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that drains it
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push an event
    pub fn emit(&self, event: BridgeEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("event receiver dropped; discarding event");
        }
    }
}
