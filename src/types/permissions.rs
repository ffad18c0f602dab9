//! Permission request and decision types

use serde::{Deserialize, Serialize};

use super::identifiers::{RequestId, ToolCallId};

/// What choosing an option means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this one operation
    AllowOnce,
    /// Allow this and future operations of the same kind
    AllowAlways,
    /// Reject this one operation
    RejectOnce,
    /// Reject this and future operations of the same kind
    RejectAlways,
}

/// One choice offered to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Id echoed back when this option is chosen
    pub option_id: String,
    /// Display label
    pub name: String,
    /// Semantics of the option
    pub kind: PermissionOptionKind,
}

/// A pending permission question surfaced to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// JSON-RPC id of the agent's request; the answer must reuse it
    pub correlation_id: RequestId,
    /// Tool call that triggered the request
    pub tool_call_id: ToolCallId,
    /// Title of the tool call, when the agent supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Raw tool call payload as sent by the agent
    pub tool_call: serde_json::Value,
    /// Options in the order the agent offered them
    pub options: Vec<PermissionOption>,
}

impl PermissionRequest {
    /// Look up an offered option by id
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&PermissionOption> {
        self.options.iter().find(|o| o.option_id == option_id)
    }
}

/// The user's answer to a permission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionDecision {
    /// One of the offered options was chosen
    Selected {
        /// Chosen option id
        #[serde(rename = "optionId")]
        option_id: String,
    },
    /// The request was dismissed or the turn was cancelled
    Cancelled,
}

impl PermissionDecision {
    /// Decision selecting `option_id`
    pub fn selected(option_id: impl Into<String>) -> Self {
        Self::Selected {
            option_id: option_id.into(),
        }
    }
}
