//! Agent session layer
//!
//! - [`AgentManager`] owns at most one live [`AgentSession`] and replaces it
//!   on `start`.
//! - [`AgentSession`] drives one conversation: prompts, cancellation,
//!   streaming updates, permission suspension.
//! - [`ToolCallRegistry`] keeps the session's tool calls in first-seen order.

mod manager;
mod session;
mod state;
mod tool_calls;

pub use manager::{AgentActivity, AgentManager, AgentStatus};
pub use session::{AgentSession, SessionPolicy, TurnResult};
pub use state::AgentState;
pub use tool_calls::ToolCallRegistry;
