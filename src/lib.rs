//! # termbridge
//!
//! A local bridge that lets a UI interleave interactive shell sessions with
//! an autonomous coding agent, and hand the agent recent terminal output as
//! context.
//!
//! Two subsystems do the work:
//!
//! - [`TerminalManager`] multiplexes PTY-backed shells. Every output chunk goes
//!   to a bounded in-memory buffer, an append-only log file, and the UI event
//!   stream.
//! - [`AgentManager`] drives one agent subprocess over the Agent Client
//!   Protocol (JSON-RPC 2.0, one message per line on stdio). It tracks tool
//!   calls and suspends turns while a permission request waits for the user.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use termbridge::{AgentManager, BridgeOptions, SessionPolicy, SubprocessLauncher, TerminalManager};
//! use termbridge::types::EventSink;
//!
//! # async fn example() -> termbridge::Result<()> {
//! let options = BridgeOptions::from_env()?;
//! let (events, mut rx) = EventSink::channel();
//!
//! let terminals = TerminalManager::new(options.terminal.clone(), events.clone());
//! let shell = terminals.open(None).await?;
//! terminals.write(&shell, b"ls\n");
//!
//! let launcher = Arc::new(SubprocessLauncher::new(options.agent.clone()));
//! let agent = AgentManager::new(launcher, SessionPolicy::from_options(&options), events);
//! agent.start(std::path::Path::new("/repo")).await?;
//!
//! let snapshot = termbridge::types::ContextSnapshot::new(
//!     shell.clone(),
//!     terminals.snapshot(&shell).unwrap_or_default(),
//! );
//! let turn = agent.prompt("why did ls fail?", vec![snapshot]).await?;
//! println!("{}", turn.text);
//!
//! while let Ok(event) = rx.try_recv() {
//!     println!("{event:?}");
//! }
//! agent.shutdown().await;
//! terminals.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Binary
//!
//! The `termbridge` binary exposes the same operations as newline-delimited
//! JSON commands on stdin and writes replies and events to stdout; see
//! [`bridge`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod bridge;
pub mod error;
pub mod permissions;
pub mod protocol;
pub mod terminal;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use agent::{AgentManager, AgentSession, AgentState, SessionPolicy, TurnResult};
pub use bridge::{Bridge, Command};
pub use error::{BridgeError, Result};
pub use permissions::{PermissionCoordinator, PermissionResponder};
pub use terminal::{TerminalInfo, TerminalManager};
pub use transport::{AgentLauncher, AgentTransport, SubprocessLauncher};
pub use types::{BridgeEvent, BridgeOptions, EventSink};

/// Version of the bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
