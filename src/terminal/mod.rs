//! Terminal sessions backed by pseudo-terminals
//!
//! [`TerminalManager`] owns every open shell. Each session pairs a
//! [`PtyProcess`] with a bounded [`OutputBuffer`] (what the agent sees as
//! context) and an append-only [`LogSink`] (everything, on disk). Output,
//! exit, title and restart notifications flow out through the shared
//! [`EventSink`](crate::types::EventSink).

mod buffer;
mod cwd;
mod manager;
mod pty;
mod title;

pub use buffer::{LogSink, OutputBuffer, SessionOutput};
pub use cwd::process_cwd;
pub use manager::{TerminalInfo, TerminalManager};
pub use pty::{PtyChild, PtyProcess, PtySpawn, PtyStreams};
pub use title::TitleScanner;
