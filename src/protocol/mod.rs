//! Agent Client Protocol over JSON-RPC 2.0
//!
//! This module provides the message types and the correlation handler for
//! talking to a coding agent over newline-delimited JSON-RPC.
//!
//! # Overview
//!
//! - [`IncomingMessage`] classifies each frame: `method` + `id` is a request
//!   from the agent, `method` alone a notification, `id` alone a response.
//! - [`ProtocolHandler`] hands out request ids and keeps one pending slot per
//!   outstanding request.
//! - The payload structs mirror the ACP methods the bridge uses:
//!   `initialize`, `session/new`, `session/prompt`, `session/cancel`,
//!   `session/update` and `session/request_permission`.
//!
//! # Example
//!
//! ```rust
//! use termbridge::protocol::{IncomingMessage, ProtocolHandler};
//! use serde_json::json;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handler = ProtocolHandler::new();
//! let (id, _rx) = handler.register()?;
//!
//! let frame = json!({"jsonrpc": "2.0", "id": id, "result": {"stopReason": "end_turn"}});
//! if let IncomingMessage::Response { id, result } = IncomingMessage::from_value(frame)? {
//!     assert!(handler.resolve(&id, result));
//! }
//! # Ok(())
//! # }
//! ```

mod capabilities;
mod handler;
mod messages;

pub use capabilities::{AgentCapabilities, ClientCapabilities};
pub use handler::ProtocolHandler;
pub use messages::{
    CancelNotification, ChunkContent, IncomingMessage, InitializeRequest, InitializeResponse,
    JSONRPC_VERSION, NewSessionRequest, NewSessionResponse, PROTOCOL_VERSION,
    PermissionToolCall, PromptRequest, PromptResponse, RequestPermissionRequest,
    RequestPermissionResponse, RpcError, SessionNotification, SessionUpdate, StopReason,
    ToolCallLocation, ToolCallPayload, ToolCallUpdatePayload, methods, notification_frame, request_frame,
    response_frame,
};
