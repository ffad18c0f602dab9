//! Lifecycle management for the agent process (spawn, shutdown)

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::types::AgentOptions;

use super::command::AgentCommand;

/// A running agent process
///
/// stdin and stdout are handed to the connection at spawn time; this handle
/// keeps the child itself and the task draining stderr.
pub struct AgentProcess {
    child: Child,
    program: PathBuf,
    stderr_task: Option<JoinHandle<()>>,
}

impl AgentProcess {
    /// Spawn `program` in `workspace` with piped stdio
    ///
    /// # Errors
    /// Returns `Spawn` if the process cannot be started or a pipe is missing
    pub fn spawn(
        program: &Path,
        workspace: &Path,
        options: &AgentOptions,
    ) -> Result<(Self, ChildStdout, ChildStdin)> {
        let mut cmd = AgentCommand::new(program, workspace, options).build();

        let mut child = cmd.spawn().map_err(|e| {
            if !workspace.is_dir() {
                return BridgeError::spawn(format!(
                    "Workspace does not exist: {}",
                    workspace.display()
                ));
            }
            BridgeError::spawn(format!("Failed to start {}: {e}", program.display()))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::spawn("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::spawn("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::spawn("Failed to get stderr handle"))?;

        // Drain stderr so the agent never blocks on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!(target: "termbridge::agent_stderr", "{line}");
            }
        });

        log::info!("Started agent {} (pid {:?})", program.display(), child.id());
        Ok((
            Self {
                child,
                program: program.to_path_buf(),
                stderr_task: Some(stderr_task),
            },
            stdout,
            stdin,
        ))
    }

    /// OS process id, while running
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait up to `grace` for a voluntary exit, then kill
    ///
    /// The caller is expected to have closed stdin already. A failed kill is
    /// logged at error level; teardown carries on regardless.
    pub async fn shutdown(&mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::info!("Agent {} exited with {}", self.program.display(), status);
            }
            Ok(Err(e)) => {
                log::warn!("Waiting for agent {} failed: {}", self.program.display(), e);
            }
            Err(_) => {
                log::warn!(
                    "Agent {} did not exit within {}s; killing",
                    self.program.display(),
                    grace.as_secs()
                );
                if let Err(e) = self.child.kill().await {
                    log::error!(
                        "Failed to kill agent {} (pid {:?}): {}",
                        self.program.display(),
                        self.child.id(),
                        e
                    );
                }
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if matches!(self.child.try_wait(), Ok(None))
            && let Err(e) = self.child.start_kill()
        {
            log::error!(
                "Failed to kill agent {} on drop: {}",
                self.program.display(),
                e
            );
        }
    }
}
