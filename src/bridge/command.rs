//! Commands accepted from the UI and the replies sent back

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{BridgeError, Result};
use crate::types::{PermissionDecision, TerminalId};

/// One UI command, tagged by `command`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    /// Spawn a shell
    #[serde(rename = "terminal.open")]
    TerminalOpen {
        /// Working directory; home when absent
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// Send keystrokes
    #[serde(rename = "terminal.write")]
    TerminalWrite {
        /// Target terminal
        id: TerminalId,
        /// Input text
        data: String,
    },
    /// Change the window size
    #[serde(rename = "terminal.resize")]
    TerminalResize {
        /// Target terminal
        id: TerminalId,
        /// Columns
        cols: u16,
        /// Rows
        rows: u16,
    },
    /// Kill a shell and forget it
    #[serde(rename = "terminal.close")]
    TerminalClose {
        /// Target terminal
        id: TerminalId,
    },
    /// Buffered output
    #[serde(rename = "terminal.snapshot")]
    TerminalSnapshot {
        /// Target terminal
        id: TerminalId,
    },
    /// Working directory of the shell
    #[serde(rename = "terminal.cwd")]
    TerminalCwd {
        /// Target terminal
        id: TerminalId,
    },
    /// All terminals
    #[serde(rename = "terminal.list")]
    TerminalList,
    /// Start (or replace) the agent session
    #[serde(rename = "agent.start")]
    AgentStart {
        /// Workspace root
        #[serde(rename = "workspacePath")]
        workspace_path: PathBuf,
    },
    /// Stop the agent session
    #[serde(rename = "agent.stop")]
    AgentStop,
    /// Run one turn
    #[serde(rename = "agent.prompt")]
    AgentPrompt {
        /// User text
        text: String,
        /// Terminals whose output is attached
        #[serde(default)]
        context: Vec<TerminalId>,
    },
    /// Abort the running turn
    #[serde(rename = "agent.cancel")]
    AgentCancel,
    /// Idle or active
    #[serde(rename = "agent.status")]
    AgentStatus,
    /// Answer the pending permission request
    #[serde(rename = "agent.permissionResponse")]
    PermissionResponse {
        /// Chosen option
        #[serde(default, rename = "optionId")]
        option_id: Option<String>,
        /// Dismiss instead of choosing
        #[serde(default)]
        cancel: bool,
    },
    /// Probe the agent's authentication status
    #[serde(rename = "agent.auth")]
    AgentAuth,
}

/// How the serve loop schedules a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Quick; run in arrival order on the input loop
    Inline,
    /// Start/stop; run in arrival order on the lifecycle worker
    Lifecycle,
    /// Long-running; run on its own task
    Detached,
}

impl Command {
    /// Scheduling class
    #[must_use]
    pub const fn dispatch(&self) -> Dispatch {
        match self {
            Self::AgentStart { .. } | Self::AgentStop => Dispatch::Lifecycle,
            Self::AgentPrompt { .. } | Self::AgentAuth => Dispatch::Detached,
            _ => Dispatch::Inline,
        }
    }

    /// Decision carried by a `PermissionResponse`
    ///
    /// # Errors
    /// Returns `Protocol` when neither an option nor `cancel` was given
    pub fn decision(option_id: Option<String>, cancel: bool) -> Result<PermissionDecision> {
        match (option_id, cancel) {
            (_, true) => Ok(PermissionDecision::Cancelled),
            (Some(option_id), false) => Ok(PermissionDecision::selected(option_id)),
            (None, false) => Err(BridgeError::protocol(
                "permission response needs optionId or cancel",
            )),
        }
    }
}

/// A decoded input line
#[derive(Debug)]
pub enum Incoming {
    /// Understood command
    Command {
        /// Echoed in the reply
        request_id: Value,
        /// The command
        command: Command,
    },
    /// Line that is not a valid command; answered with an error
    Invalid {
        /// Echoed in the reply when it could be recovered
        request_id: Value,
        /// What was wrong
        error: BridgeError,
    },
}

impl Incoming {
    /// Classify one JSON value read from the UI
    #[must_use]
    pub fn parse(value: Value) -> Self {
        let request_id = value.get("requestId").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<Command>(value) {
            Ok(command) => Self::Command {
                request_id,
                command,
            },
            Err(e) => Self::Invalid {
                request_id,
                error: BridgeError::protocol(format!("invalid command: {e}")),
            },
        }
    }
}

/// Reply line for `request_id`
#[must_use]
pub fn reply_frame(request_id: &Value, result: Result<Value>) -> Value {
    match result {
        Ok(result) => json!({ "reply": request_id, "ok": true, "result": result }),
        Err(error) => json!({ "reply": request_id, "ok": false, "error": error.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_commands() {
        let incoming = Incoming::parse(json!({
            "command": "terminal.resize",
            "requestId": 7,
            "id": "t1",
            "cols": 120,
            "rows": 40
        }));
        let Incoming::Command {
            request_id,
            command,
        } = incoming
        else {
            panic!("expected a command");
        };
        assert_eq!(request_id, json!(7));
        assert_eq!(
            command,
            Command::TerminalResize {
                id: TerminalId::from("t1"),
                cols: 120,
                rows: 40
            }
        );
        assert_eq!(command.dispatch(), Dispatch::Inline);
    }

    #[test]
    fn unknown_command_keeps_request_id() {
        let incoming = Incoming::parse(json!({ "command": "terminal.explode", "requestId": "a" }));
        match incoming {
            Incoming::Invalid { request_id, .. } => assert_eq!(request_id, json!("a")),
            Incoming::Command { .. } => panic!("unknown command accepted"),
        }
    }

    #[test]
    fn permission_response_needs_a_choice() {
        assert!(Command::decision(None, false).is_err());
        assert_eq!(
            Command::decision(Some("allow".into()), false).ok(),
            Some(PermissionDecision::selected("allow"))
        );
        assert_eq!(
            Command::decision(Some("allow".into()), true).ok(),
            Some(PermissionDecision::Cancelled)
        );
    }

    #[test]
    fn reply_shape() {
        let ok = reply_frame(&json!(1), Ok(json!({ "id": "t1" })));
        assert_eq!(ok, json!({ "reply": 1, "ok": true, "result": { "id": "t1" } }));

        let err = reply_frame(&json!(2), Err(BridgeError::NoActiveSession));
        assert_eq!(err["ok"], json!(false));
        assert_eq!(err["error"], json!("No active agent session"));
    }
}
