//! Configuration constants for the agent subprocess

use std::time::Duration;

/// Agent launched when nothing else is configured
pub const DEFAULT_AGENT_PROGRAM: &str = "claude-code-acp";

/// Environment variable pointing at the agent executable
pub const AGENT_PATH_ENV: &str = "TERMBRIDGE_AGENT_PATH";

/// Default maximum size of one JSON-RPC line (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Time allowed for the authentication probe
pub const AUTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Dangerous environment variables that should not be passed to subprocess
///
/// These variables can affect how the subprocess loads and executes code,
/// potentially creating security vulnerabilities.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

/// Install locations searched when the agent is not on `PATH`, relative to
/// `$HOME` unless absolute
pub const COMMON_BIN_DIRS: &[&str] = &[
    ".npm-global/bin",
    "/usr/local/bin",
    "/opt/homebrew/bin",
    ".local/bin",
    "node_modules/.bin",
    ".yarn/bin",
    ".bun/bin",
];
