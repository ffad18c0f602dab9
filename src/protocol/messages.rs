//! JSON-RPC envelopes and Agent Client Protocol payloads

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{BridgeError, Result};
use crate::types::{
    AgentSessionId, ContentBlock, PermissionDecision, PermissionOption, RequestId, ToolCallId,
    ToolCallStatus, ToolKind,
};

use super::capabilities::{AgentCapabilities, ClientCapabilities};

/// JSON-RPC version string carried on every frame
pub const JSONRPC_VERSION: &str = "2.0";

/// Agent Client Protocol version spoken by this client
pub const PROTOCOL_VERSION: u16 = 1;

/// Method names
pub mod methods {
    /// Handshake
    pub const INITIALIZE: &str = "initialize";
    /// Create a conversation
    pub const SESSION_NEW: &str = "session/new";
    /// Run one turn
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Abort the running turn (notification)
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Streaming progress (agent to client notification)
    pub const SESSION_UPDATE: &str = "session/update";
    /// Ask the user for permission (agent to client request)
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
}

// ============================================================================
// Envelopes
// ============================================================================

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Method does not exist
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i64 = -32603;

    /// `-32601` for `method`
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    /// `-32602` with a message
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_PARAMS,
            message: msg.into(),
            data: None,
        }
    }

    /// `-32603` with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: Self::INTERNAL_ERROR,
            message: msg.into(),
            data: None,
        }
    }
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// An inbound frame classified by its discriminating fields
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// `method` and `id`: the agent expects an answer
    Request {
        /// Correlation id to echo
        id: RequestId,
        /// Method name
        method: String,
        /// Parameters (`null` when absent)
        params: Value,
    },
    /// `method` only
    Notification {
        /// Method name
        method: String,
        /// Parameters (`null` when absent)
        params: Value,
    },
    /// `id` only: answer to one of our requests
    Response {
        /// Correlation id
        id: RequestId,
        /// Result or error object
        result: std::result::Result<Value, RpcError>,
    },
}

impl IncomingMessage {
    /// Classify a decoded JSON frame
    ///
    /// # Errors
    /// Returns `Protocol` if the frame has neither `method` nor `id`, or if
    /// its fields have the wrong types
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawMessage = serde_json::from_value(value)
            .map_err(|e| BridgeError::protocol(format!("malformed JSON-RPC frame: {e}")))?;
        match (raw.method, raw.id) {
            (Some(method), Some(id)) => Ok(Self::Request {
                id,
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (Some(method), None) => Ok(Self::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, Some(id)) => Ok(Self::Response {
                id,
                result: match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                },
            }),
            (None, None) => Err(BridgeError::protocol(
                "frame has neither method nor id",
            )),
        }
    }
}

/// Outbound request frame
#[must_use]
pub fn request_frame(id: &RequestId, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params })
}

/// Outbound notification frame
#[must_use]
pub fn notification_frame(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params })
}

/// Outbound response frame
#[must_use]
pub fn response_frame(id: &RequestId, result: std::result::Result<Value, RpcError>) -> Value {
    match result {
        Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
        Err(error) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }),
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// `initialize` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Protocol version requested
    pub protocol_version: u16,
    /// What the client serves
    pub client_capabilities: ClientCapabilities,
}

/// `initialize` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Protocol version the agent chose
    pub protocol_version: u16,
    /// What the agent supports
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
    /// Authentication methods the agent offers
    #[serde(default)]
    pub auth_methods: Vec<Value>,
}

// ============================================================================
// Sessions and prompts
// ============================================================================

/// `session/new` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    /// Workspace root
    pub cwd: PathBuf,
    /// MCP servers for the agent to connect to
    pub mcp_servers: Vec<Value>,
}

/// `session/new` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// Agent-assigned session id
    pub session_id: AgentSessionId,
}

/// `session/prompt` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Target session
    pub session_id: AgentSessionId,
    /// Prompt content
    pub prompt: Vec<ContentBlock>,
}

/// Why a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished
    EndTurn,
    /// Token limit reached
    MaxTokens,
    /// Request limit reached within the turn
    MaxTurnRequests,
    /// The model refused
    Refusal,
    /// The client cancelled
    Cancelled,
    /// A reason this build does not know
    #[serde(other)]
    Other,
}

/// `session/prompt` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the turn ended
    pub stop_reason: StopReason,
}

/// `session/cancel` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelNotification {
    /// Target session
    pub session_id: AgentSessionId,
}

// ============================================================================
// Updates
// ============================================================================

/// `session/update` params
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to
    pub session_id: AgentSessionId,
    /// The update
    pub update: SessionUpdate,
}

/// Content of a streamed chunk; only text is rendered
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkContent {
    /// Block type (`text`, `image`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Text, for text blocks
    #[serde(default)]
    pub text: Option<String>,
}

/// Body of a `tool_call` update
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    /// Agent-assigned id
    pub tool_call_id: ToolCallId,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Category
    #[serde(default)]
    pub kind: ToolKind,
    /// Status
    #[serde(default)]
    pub status: ToolCallStatus,
    /// Raw input
    #[serde(default)]
    pub raw_input: Option<Value>,
    /// Raw output
    #[serde(default)]
    pub raw_output: Option<Value>,
    /// Files the call touches
    #[serde(default)]
    pub locations: Vec<ToolCallLocation>,
}

/// A file position a tool call refers to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolCallLocation {
    /// Absolute path
    pub path: String,
    /// 1-based line, when known
    #[serde(default)]
    pub line: Option<u32>,
}

impl ToolCallLocation {
    /// `path` or `path:line`
    #[must_use]
    pub fn label(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{line}", self.path),
            None => self.path.clone(),
        }
    }
}

/// Body of a `tool_call_update` update; absent fields are unchanged
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdatePayload {
    /// Id of the call being updated
    pub tool_call_id: ToolCallId,
    /// New title
    #[serde(default)]
    pub title: Option<String>,
    /// New category
    #[serde(default)]
    pub kind: Option<ToolKind>,
    /// New status
    #[serde(default)]
    pub status: Option<ToolCallStatus>,
    /// New raw input
    #[serde(default)]
    pub raw_input: Option<Value>,
    /// New raw output
    #[serde(default)]
    pub raw_output: Option<Value>,
    /// Replacement location list
    #[serde(default)]
    pub locations: Option<Vec<ToolCallLocation>>,
}

/// The update variants the session reacts to
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Assistant reply fragment
    AgentMessageChunk {
        /// Fragment
        content: ChunkContent,
    },
    /// Visible reasoning fragment
    AgentThoughtChunk {
        /// Fragment
        content: ChunkContent,
    },
    /// Echo of user input
    UserMessageChunk {
        /// Fragment
        content: ChunkContent,
    },
    /// New tool call
    ToolCall(ToolCallPayload),
    /// Change to an existing tool call
    ToolCallUpdate(ToolCallUpdatePayload),
    /// Execution plan
    Plan {
        /// Plan entries
        entries: Value,
    },
    /// Anything else (mode changes, command lists, ...)
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Permissions
// ============================================================================

/// Tool call reference inside a permission request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionToolCall {
    /// Id of the tool call
    pub tool_call_id: ToolCallId,
    /// Title, when provided
    #[serde(default)]
    pub title: Option<String>,
}

/// `session/request_permission` params
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionRequest {
    /// Session asking
    pub session_id: AgentSessionId,
    /// The tool call needing approval, as sent
    pub tool_call: Value,
    /// Choices to offer
    pub options: Vec<PermissionOption>,
}

impl RequestPermissionRequest {
    /// Typed view of the tool call reference
    ///
    /// # Errors
    /// Returns `JsonDecode` if `toolCallId` is missing
    pub fn tool_call_ref(&self) -> Result<PermissionToolCall> {
        Ok(serde_json::from_value(self.tool_call.clone())?)
    }
}

/// `session/request_permission` result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPermissionResponse {
    /// The user's decision
    pub outcome: PermissionDecision,
}
