//! Agent session lifecycle states

use std::fmt;

use serde::Serialize;

/// Where an agent session is in its lifecycle
///
/// ```text
/// Idle -> Starting -> Ready -> Prompting <-> AwaitingPermission
///                       ^          |
///                       +----------+
/// any state -> Stopped (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// No agent running
    Idle,
    /// Launching the agent and creating its session
    Starting,
    /// Waiting for a prompt
    Ready,
    /// A turn is running
    Prompting,
    /// A turn is blocked on a permission decision
    AwaitingPermission,
    /// Torn down; never leaves this state
    Stopped,
}

impl AgentState {
    /// A turn is in flight
    #[must_use]
    pub const fn is_turn_active(self) -> bool {
        matches!(self, Self::Prompting | Self::AwaitingPermission)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Prompting => "prompting",
            Self::AwaitingPermission => "awaiting permission",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
