//! Bridge options and configuration
//!
//! All tunables live in [`BridgeOptions`]. Build one with
//! [`BridgeOptions::builder`], or read overrides from the environment with
//! [`BridgeOptions::from_env`].

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::transport::{AGENT_PATH_ENV, DEFAULT_AGENT_PROGRAM, DEFAULT_MAX_FRAME_SIZE};

/// Default size of each terminal's in-memory output buffer (256 KiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 256 * 1024;

/// Default time allowed for the `initialize` handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Terminal options
// ============================================================================

/// Settings for spawned shell sessions
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    /// Shell executable
    pub shell: PathBuf,
    /// Arguments passed to the shell
    pub shell_args: Vec<String>,
    /// Directory receiving one log file per session
    pub log_dir: PathBuf,
    /// Bytes kept in each in-memory output buffer
    pub buffer_capacity: usize,
    /// Initial PTY width
    pub cols: u16,
    /// Initial PTY height
    pub rows: u16,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            shell_args: Vec::new(),
            log_dir: env::temp_dir().join("termbridge").join("logs"),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            cols: 80,
            rows: 24,
        }
    }
}

/// The user's login shell, falling back to bash then sh
#[must_use]
pub fn default_shell() -> PathBuf {
    if let Ok(shell) = env::var("SHELL")
        && !shell.trim().is_empty()
    {
        return PathBuf::from(shell);
    }
    if Path::new("/bin/bash").exists() {
        PathBuf::from("/bin/bash")
    } else {
        PathBuf::from("/bin/sh")
    }
}

/// The user's home directory, falling back to the process cwd
#[must_use]
pub fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"))
}

// ============================================================================
// Agent options
// ============================================================================

/// Settings for launching the agent subprocess
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Program name or path of the agent
    pub program: String,
    /// Explicit path, bypassing discovery
    pub path: Option<PathBuf>,
    /// Arguments passed to the agent
    pub args: Vec<String>,
    /// Arguments for the authentication probe
    pub identity_args: Vec<String>,
    /// Extra environment variables (dangerous ones are filtered)
    pub env: HashMap<String, String>,
    /// Time allowed for the `initialize` handshake
    pub handshake_timeout: Duration,
    /// Largest accepted stdout line
    pub max_frame_size: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            program: DEFAULT_AGENT_PROGRAM.to_string(),
            path: None,
            args: Vec::new(),
            identity_args: vec!["auth".to_string(), "status".to_string()],
            env: HashMap::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// ============================================================================
// Bridge options
// ============================================================================

/// Main options for the bridge
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    /// Shell session settings
    pub terminal: TerminalOptions,
    /// Agent subprocess settings
    pub agent: AgentOptions,
    /// Cap on bytes per terminal snapshot attached to a prompt; `None` sends
    /// the whole buffer
    pub context_limit: Option<usize>,
    /// Auto-cancel unanswered permission requests after this long; `None`
    /// waits forever
    pub permission_timeout: Option<Duration>,
}

impl BridgeOptions {
    /// Create a new builder for `BridgeOptions`
    #[must_use]
    pub fn builder() -> BridgeOptionsBuilder {
        BridgeOptionsBuilder::default()
    }

    /// Defaults overlaid with `TERMBRIDGE_*` environment variables
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a numeric variable does not parse
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a numeric variable does not parse
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(shell) = get("TERMBRIDGE_SHELL") {
            options.terminal.shell = PathBuf::from(shell);
        }
        if let Some(dir) = get("TERMBRIDGE_LOG_DIR") {
            options.terminal.log_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = get("TERMBRIDGE_BUFFER_BYTES") {
            options.terminal.buffer_capacity = parse_number("TERMBRIDGE_BUFFER_BYTES", &bytes)?;
            if options.terminal.buffer_capacity == 0 {
                return Err(BridgeError::invalid_config(
                    "TERMBRIDGE_BUFFER_BYTES must be greater than zero",
                ));
            }
        }
        if let Some(path) = get(AGENT_PATH_ENV) {
            options.agent.path = Some(PathBuf::from(path));
        }
        if let Some(secs) = get("TERMBRIDGE_HANDSHAKE_TIMEOUT_SECS") {
            options.agent.handshake_timeout =
                Duration::from_secs(parse_number("TERMBRIDGE_HANDSHAKE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(limit) = get("TERMBRIDGE_CONTEXT_LIMIT") {
            options.context_limit = Some(parse_number("TERMBRIDGE_CONTEXT_LIMIT", &limit)?);
        }
        if let Some(secs) = get("TERMBRIDGE_PERMISSION_TIMEOUT_SECS") {
            options.permission_timeout = Some(Duration::from_secs(parse_number(
                "TERMBRIDGE_PERMISSION_TIMEOUT_SECS",
                &secs,
            )?));
        }

        Ok(options)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::invalid_config(format!("{key}: '{value}' is not a valid number")))
}

// ============================================================================
// Builder for BridgeOptions
// ============================================================================

/// Builder for `BridgeOptions`
#[derive(Debug, Default)]
pub struct BridgeOptionsBuilder {
    options: BridgeOptions,
}

impl BridgeOptionsBuilder {
    /// Set the shell executable
    #[must_use]
    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.options.terminal.shell = shell.into();
        self
    }

    /// Set the shell arguments
    #[must_use]
    pub fn shell_args(mut self, args: Vec<impl Into<String>>) -> Self {
        self.options.terminal.shell_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the terminal log directory
    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.terminal.log_dir = dir.into();
        self
    }

    /// Set the per-terminal buffer capacity
    ///
    /// # Panics
    /// Panics if `bytes` is zero
    #[must_use]
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "buffer capacity must be greater than zero");
        self.options.terminal.buffer_capacity = bytes;
        self
    }

    /// Set the initial PTY size
    #[must_use]
    pub const fn initial_size(mut self, cols: u16, rows: u16) -> Self {
        self.options.terminal.cols = cols;
        self.options.terminal.rows = rows;
        self
    }

    /// Set the agent program name
    #[must_use]
    pub fn agent_program(mut self, program: impl Into<String>) -> Self {
        self.options.agent.program = program.into();
        self
    }

    /// Set an explicit agent path
    #[must_use]
    pub fn agent_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.agent.path = Some(path.into());
        self
    }

    /// Set the agent arguments
    #[must_use]
    pub fn agent_args(mut self, args: Vec<impl Into<String>>) -> Self {
        self.options.agent.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the authentication probe arguments
    #[must_use]
    pub fn identity_args(mut self, args: Vec<impl Into<String>>) -> Self {
        self.options.agent.identity_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable for the agent
    #[must_use]
    pub fn agent_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.agent.env.insert(key.into(), value.into());
        self
    }

    /// Set the handshake timeout
    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.agent.handshake_timeout = timeout;
        self
    }

    /// Cap bytes per attached terminal snapshot
    #[must_use]
    pub const fn context_limit(mut self, bytes: usize) -> Self {
        self.options.context_limit = Some(bytes);
        self
    }

    /// Auto-cancel unanswered permission requests
    #[must_use]
    pub const fn permission_timeout(mut self, timeout: Duration) -> Self {
        self.options.permission_timeout = Some(timeout);
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> BridgeOptions {
        self.options
    }
}
