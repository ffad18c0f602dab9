//! Owner of the (at most one) live agent session

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{BridgeError, Result};
use crate::transport::AgentLauncher;
use crate::types::{
    AgentSessionId, BridgeEvent, ContextSnapshot, EventSink, PermissionDecision, PermissionRequest,
};

use super::session::{AgentSession, SessionPolicy, TurnResult};
use super::state::AgentState;

/// Coarse liveness reported to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentActivity {
    /// No usable session
    Idle,
    /// A session exists and has not stopped
    Active,
}

/// Snapshot returned by [`AgentManager::status`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// `idle` or `active`
    pub status: AgentActivity,
    /// Fine-grained state
    pub state: AgentState,
    /// Agent session id, when active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<AgentSessionId>,
    /// Workspace, when active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Request awaiting a decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_permission: Option<PermissionRequest>,
    /// Number of tool calls seen in this session
    pub tool_calls: usize,
}

/// Starts, replaces and addresses the single agent session
///
/// Constructed once by the host and shared by reference; there is no global
/// current session. `start` and `stop` are serialized; lookups for prompt,
/// cancel and permission answers never wait behind a launch.
pub struct AgentManager {
    launcher: Arc<dyn AgentLauncher>,
    policy: SessionPolicy,
    events: EventSink,
    lifecycle: tokio::sync::Mutex<()>,
    current: Mutex<Option<Arc<AgentSession>>>,
}

impl AgentManager {
    /// Create a manager with no session
    pub fn new(launcher: Arc<dyn AgentLauncher>, policy: SessionPolicy, events: EventSink) -> Self {
        Self {
            launcher,
            policy,
            events,
            lifecycle: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Start a session in `workspace`, stopping any existing one first
    ///
    /// The old session is fully torn down (its process reaped) before the
    /// new agent is launched.
    ///
    /// # Errors
    /// Returns the launch or `session/new` failure; the manager is then idle
    pub async fn start(&self, workspace: &Path) -> Result<AgentSessionId> {
        let _lifecycle = self.lifecycle.lock().await;
        let old = self.current.lock().take();
        if let Some(old) = old {
            log::info!("Replacing agent session {}", old.id());
            old.stop("replaced by a new session").await;
        }

        let session = AgentSession::start(
            self.launcher.as_ref(),
            workspace,
            self.events.clone(),
            self.policy.clone(),
        )
        .await?;
        let id = session.id().clone();
        *self.current.lock() = Some(Arc::new(session));
        Ok(id)
    }

    /// Stop the current session, if any; idempotent
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let session = self.current.lock().take();
        if let Some(session) = session {
            session.stop("stopped by user").await;
            self.events.emit(BridgeEvent::AgentStateChanged {
                state: AgentState::Idle,
            });
        }
    }

    /// The live session
    ///
    /// # Errors
    /// Returns `NoActiveSession` if there is none or it has stopped
    pub fn current(&self) -> Result<Arc<AgentSession>> {
        self.current
            .lock()
            .as_ref()
            .filter(|session| !session.is_stopped())
            .cloned()
            .ok_or(BridgeError::NoActiveSession)
    }

    /// Run one turn on the current session
    ///
    /// No manager lock is held while the turn runs, so `cancel` and
    /// `respond_permission` stay available.
    ///
    /// # Errors
    /// Returns `NoActiveSession`, or whatever [`AgentSession::prompt`] returns
    pub async fn prompt(&self, text: &str, context: Vec<ContextSnapshot>) -> Result<TurnResult> {
        let session = self.current()?;
        session.prompt(text, context).await
    }

    /// Cancel the current turn
    ///
    /// # Errors
    /// Returns `NoActiveSession` or `InvalidState`
    pub fn cancel(&self) -> Result<()> {
        self.current()?.cancel()
    }

    /// Answer the pending permission request
    ///
    /// # Errors
    /// Returns `NoActiveSession`, `NoPendingPermission` or
    /// `UnknownPermissionOption`
    pub fn respond_permission(&self, decision: PermissionDecision) -> Result<()> {
        self.current()?.respond_permission(decision)
    }

    /// Report whether a session is active
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        let current = self.current.lock();
        match current.as_ref().filter(|session| !session.is_stopped()) {
            Some(session) => AgentStatus {
                status: AgentActivity::Active,
                state: session.state(),
                session_id: Some(session.id().clone()),
                workspace: Some(session.workspace().to_path_buf()),
                pending_permission: session.pending_permission(),
                tool_calls: session.tool_calls().len(),
            },
            None => AgentStatus {
                status: AgentActivity::Idle,
                state: AgentState::Idle,
                session_id: None,
                workspace: None,
                pending_permission: None,
                tool_calls: 0,
            },
        }
    }

    /// Stop everything before the host exits
    pub async fn shutdown(&self) {
        self.stop().await;
    }
}

impl std::fmt::Debug for AgentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
