//! Locating, spawning and connecting to the agent executable

use std::env;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;

use crate::error::{BridgeError, Result};
use crate::transport::{AgentLauncher, AgentTransport};
use crate::types::AgentOptions;
use crate::types::options::home_dir;

use super::config::COMMON_BIN_DIRS;
use super::lifecycle::AgentProcess;

/// Launches the configured agent as a child process
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    options: AgentOptions,
}

impl SubprocessLauncher {
    /// Create a launcher for `options`
    #[must_use]
    pub const fn new(options: AgentOptions) -> Self {
        Self { options }
    }

    /// Launch options in use
    #[must_use]
    pub const fn options(&self) -> &AgentOptions {
        &self.options
    }
}

impl AgentLauncher for SubprocessLauncher {
    fn launch<'a>(&'a self, workspace: &'a Path) -> BoxFuture<'a, Result<AgentTransport>> {
        Box::pin(connect(&self.options, workspace))
    }
}

/// Locate, spawn and handshake with the agent
///
/// On any failure the process is torn down before the error is returned.
///
/// # Errors
/// Returns `AgentNotFound`, `Spawn`, `Timeout` or `Protocol`
pub async fn connect(options: &AgentOptions, workspace: &Path) -> Result<AgentTransport> {
    let locate_options = options.clone();
    let program = tokio::task::spawn_blocking(move || find_agent(&locate_options))
        .await
        .map_err(|e| BridgeError::spawn(format!("agent lookup task failed: {e}")))??;

    let (process, stdout, stdin) = AgentProcess::spawn(&program, workspace, options)?;
    let transport = AgentTransport::from_streams(stdout, stdin, options.max_frame_size);
    transport.attach_process(process);

    if let Err(e) = transport.initialize(options.handshake_timeout).await {
        log::warn!("Agent handshake failed: {e}");
        transport.disconnect().await;
        return Err(e);
    }
    Ok(transport)
}

/// Find the agent executable
///
/// Order: explicit path, `PATH` via `which`, common install directories,
/// then the user's login shell (which sees PATH edits from shell rc files
/// that a GUI-launched process misses).
///
/// # Errors
/// Returns `AgentNotFound` if every strategy fails
pub fn find_agent(options: &AgentOptions) -> Result<PathBuf> {
    if let Some(path) = &options.path {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(BridgeError::AgentNotFound(format!(
            "configured agent path {} does not exist",
            path.display()
        )));
    }

    let program = options.program.as_str();
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        if as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }
        return Err(BridgeError::agent_not_found(program));
    }

    if let Ok(path) = which::which(program) {
        return Ok(path);
    }

    if let Some(candidate) = install_dirs(&home_dir())
        .into_iter()
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
    {
        return Ok(candidate);
    }

    if let Some(path) = login_shell_lookup(program) {
        return Ok(path);
    }

    Err(BridgeError::agent_not_found(program))
}

/// Common install directories, relative entries resolved against `home`
fn install_dirs(home: &Path) -> Vec<PathBuf> {
    COMMON_BIN_DIRS
        .iter()
        .map(|dir| {
            if dir.starts_with('/') {
                PathBuf::from(dir)
            } else {
                home.join(dir)
            }
        })
        .collect()
}

fn login_shell_lookup(program: &str) -> Option<PathBuf> {
    // The name is interpolated into a shell command line
    if !program
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return None;
    }
    let shell = env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let output = std::process::Command::new(shell)
        .args(["-lc", &format!("command -v {program}")])
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let found = String::from_utf8_lossy(&output.stdout);
    let path = PathBuf::from(found.lines().last()?.trim());
    path.is_file().then_some(path)
}
