//! Error types for the terminal/agent bridge

use thiserror::Error;

use crate::protocol::RpcError;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Agent executable could not be located
    #[error("Agent executable not found: {0}")]
    AgentNotFound(String),

    /// A shell or agent process failed to start
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// Connection error when communicating with the agent
    #[error("Connection error: {0}")]
    Connection(String),

    /// Framing or handshake violated the agent protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The agent answered a request with a JSON-RPC error object
    #[error("Agent returned error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional structured detail
        data: Option<serde_json::Value>,
    },

    /// The agent process exited or the session was torn down
    #[error("Agent process exited: {0}")]
    ProcessExited(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// JSON decode error
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation is not valid in the current agent state
    #[error("Cannot {operation} while agent is {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: String,
    },

    /// No live agent session exists
    #[error("No active agent session")]
    NoActiveSession,

    /// A permission request is already awaiting a decision
    #[error("A permission request is already pending")]
    PermissionAlreadyPending,

    /// A permission decision arrived with nothing to resolve
    #[error("No permission request is pending")]
    NoPendingPermission,

    /// The chosen option id is not one of the offered options
    #[error("Unknown permission option: {0}")]
    UnknownPermissionOption(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Create an agent-not-found error with install guidance
    #[must_use]
    pub fn agent_not_found(program: &str) -> Self {
        Self::AgentNotFound(format!(
            "'{program}' was not found on PATH or in common install locations.\n\
             Install an ACP-compatible agent, or point {} at the executable",
            crate::transport::AGENT_PATH_ENV
        ))
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a process-exited error
    pub fn process_exited(msg: impl Into<String>) -> Self {
        Self::ProcessExited(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True when the error means the agent connection is gone
    #[must_use]
    pub const fn is_process_exit(&self) -> bool {
        matches!(self, Self::ProcessExited(_))
    }
}

impl From<RpcError> for BridgeError {
    fn from(err: RpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
