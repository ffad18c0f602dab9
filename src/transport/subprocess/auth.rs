//! Authentication probe for the agent executable

use serde::Serialize;
use tokio::process::Command;

use crate::error::{BridgeError, Result};
use crate::types::AgentOptions;

use super::config::AUTH_PROBE_TIMEOUT;
use super::launcher::find_agent;

/// Result of running the agent's identity command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    /// The command exited successfully
    pub authenticated: bool,
    /// First non-empty output line, for display
    pub detail: String,
}

/// Run `<agent> <identity_args>` and report whether it succeeded
///
/// # Errors
/// Returns `AgentNotFound` if the agent cannot be located, `Timeout` if the
/// command hangs, or `Spawn` if it cannot be started
pub async fn probe_auth(options: &AgentOptions) -> Result<AuthStatus> {
    let locate_options = options.clone();
    let program = tokio::task::spawn_blocking(move || find_agent(&locate_options))
        .await
        .map_err(|e| BridgeError::spawn(format!("agent lookup task failed: {e}")))??;

    let mut cmd = Command::new(&program);
    cmd.args(&options.identity_args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(AUTH_PROBE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| BridgeError::timeout("authentication probe did not finish"))?
        .map_err(|e| BridgeError::spawn(format!("Failed to run {}: {e}", program.display())))?;

    let text = if output.stdout.iter().any(|b| !b.is_ascii_whitespace()) {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        String::from_utf8_lossy(&output.stderr).into_owned()
    };
    let detail = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();

    log::debug!(
        "Auth probe for {} exited with {}: {}",
        program.display(),
        output.status,
        detail
    );
    Ok(AuthStatus {
        authenticated: output.status.success(),
        detail,
    })
}
