//! Type definitions shared across the bridge
//!
//! - [`identifiers`] - Type-safe ID wrappers (`TerminalId`, `ToolCallId`, `RequestId`)
//! - [`tool_calls`] - Tool call records and status ordering
//! - [`permissions`] - Permission requests, options and decisions
//! - [`content`] - Prompt content blocks and terminal snapshots
//! - [`events`] - Events pushed to the UI
//! - [`options`] - Configuration and builder

pub mod content;
pub mod events;
pub mod identifiers;
pub mod options;
pub mod permissions;
pub mod tool_calls;

pub use content::{ContentBlock, ContextSnapshot, EmbeddedResource};
pub use events::{AgentUpdate, BridgeEvent, EventSink};
pub use identifiers::{AgentSessionId, RequestId, TerminalId, ToolCallId};
pub use options::{AgentOptions, BridgeOptions, BridgeOptionsBuilder, TerminalOptions};
pub use permissions::{PermissionDecision, PermissionOption, PermissionOptionKind, PermissionRequest};
pub use tool_calls::{ToolCall, ToolCallStatus, ToolKind};
