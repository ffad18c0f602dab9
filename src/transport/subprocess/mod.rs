//! Agent executable as a child process
//!
//! This module locates the agent binary, spawns it with piped stdio and
//! wires its stdout/stdin into an [`AgentTransport`](super::AgentTransport).

mod auth;
mod command;
mod config;
mod launcher;
mod lifecycle;

pub use auth::{AuthStatus, probe_auth};
pub use config::{
    AGENT_PATH_ENV, AUTH_PROBE_TIMEOUT, DANGEROUS_ENV_VARS, DEFAULT_AGENT_PROGRAM,
    DEFAULT_MAX_FRAME_SIZE,
};
pub use launcher::{SubprocessLauncher, connect, find_agent};
pub use lifecycle::AgentProcess;
