//! Tool call records reported by the agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifiers::ToolCallId;

/// Category of work a tool call performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Reading files or data
    Read,
    /// Modifying files or content
    Edit,
    /// Removing files or data
    Delete,
    /// Moving or renaming files
    Move,
    /// Searching for information
    Search,
    /// Running commands or code
    Execute,
    /// Internal reasoning
    Think,
    /// Retrieving external data
    Fetch,
    /// Switching the agent's session mode
    SwitchMode,
    /// Asking the user something
    Ask,
    /// Anything else, including kinds this build does not know
    #[default]
    #[serde(other)]
    Other,
}

/// Execution status of a tool call
///
/// Status only moves forward: `pending -> in_progress -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Not started yet (also used while awaiting permission)
    #[default]
    Pending,
    /// Currently running
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl ToolCallStatus {
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Completed or failed
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Apply `next` on top of `self`, refusing regressions and refusing to
    /// leave a terminal status.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }
}

/// A tool call tracked for the current agent session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Agent-assigned id
    pub id: ToolCallId,
    /// Human readable title
    pub title: String,
    /// Secondary line, the first file location the call touches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Category
    pub kind: ToolKind,
    /// Current status
    pub status: ToolCallStatus,
    /// Raw input parameters sent to the tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<serde_json::Value>,
    /// Raw output, only recorded once the call reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<serde_json::Value>,
    /// When this call was first seen
    pub created_at: DateTime<Utc>,
    /// When this call last changed
    pub updated_at: DateTime<Utc>,
}
