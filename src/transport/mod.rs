//! Transport layer for communicating with the agent
//!
//! This module provides the JSON-line codec, the [`AgentTransport`]
//! connection and the subprocess launcher that produces one.

mod codec;
mod connection;
pub mod subprocess;

use std::path::Path;

use futures::future::BoxFuture;

use crate::error::Result;

pub use codec::{Frame, JsonLineCodec};
pub use connection::{AgentTransport, ConnectionState, Inbound, InboundHandler, PendingResponse};
pub use subprocess::{
    AGENT_PATH_ENV, AgentProcess, AuthStatus, DEFAULT_AGENT_PROGRAM, DEFAULT_MAX_FRAME_SIZE,
    SubprocessLauncher,
};

/// Produces connected, initialized agent transports
///
/// The real implementation spawns a subprocess; tests substitute one that
/// wires the transport to an in-memory peer.
pub trait AgentLauncher: Send + Sync {
    /// Start an agent for `workspace` and complete the `initialize` handshake
    ///
    /// # Errors
    /// Returns error if the agent cannot be found, started or initialized
    fn launch<'a>(&'a self, workspace: &'a Path) -> BoxFuture<'a, Result<AgentTransport>>;
}
