//! One conversation with a running agent
//!
//! An [`AgentSession`] owns the transport for its agent process, the
//! tool-call registry and the permission slot. Agent traffic is handled on
//! the transport's reader task, which is the only writer of the registry and
//! of new permission requests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::permissions::{PermissionCoordinator, PermissionResponder};
use crate::protocol::{
    AgentCapabilities, CancelNotification, NewSessionRequest, NewSessionResponse, PromptRequest,
    PromptResponse, RequestPermissionRequest, RpcError, SessionNotification, SessionUpdate,
    StopReason, methods,
};
use crate::transport::{AgentLauncher, AgentTransport, Inbound, InboundHandler};
use crate::types::options::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::types::{
    AgentSessionId, AgentUpdate, BridgeEvent, BridgeOptions, ContentBlock, ContextSnapshot,
    EventSink, PermissionDecision, PermissionRequest, RequestId, ToolCall,
};

use super::state::AgentState;
use super::tool_calls::ToolCallRegistry;

/// Per-session policies
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Byte limit applied to each terminal snapshot; `None` sends it whole
    pub context_limit: Option<usize>,
    /// Auto-cancel unanswered permission requests after this long
    pub permission_timeout: Option<Duration>,
    /// Deadline for `session/new`
    pub setup_timeout: Duration,
}

impl SessionPolicy {
    /// Policy taken from bridge configuration
    #[must_use]
    pub fn from_options(options: &BridgeOptions) -> Self {
        Self {
            context_limit: options.context_limit,
            permission_timeout: options.permission_timeout,
            setup_timeout: options.agent.handshake_timeout,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            context_limit: None,
            permission_timeout: None,
            setup_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Outcome of one prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    /// Why the turn ended
    pub stop_reason: StopReason,
    /// Concatenated message chunks streamed during the turn
    pub text: String,
}

/// Bookkeeping for the turn in flight
#[derive(Default)]
struct Turn {
    seq: u64,
    text: String,
    cancel: Option<oneshot::Sender<()>>,
}

struct SessionInner {
    // Set once session/new answers; traffic for any other id is dropped
    id: OnceLock<AgentSessionId>,
    workspace: PathBuf,
    transport: Arc<AgentTransport>,
    state: watch::Sender<AgentState>,
    permissions: PermissionCoordinator,
    tool_calls: Mutex<ToolCallRegistry>,
    // Lock order: turn, then the permission slot, then state
    turn: Mutex<Turn>,
    events: EventSink,
    policy: SessionPolicy,
    finished: AtomicBool,
}

impl SessionInner {
    fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Move to `to` if the current state is one of `from`
    ///
    /// The state event is emitted under the watch lock so UI events keep the
    /// order of the transitions.
    fn transition(&self, from: &[AgentState], to: AgentState) -> std::result::Result<(), AgentState> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                self.events.emit(BridgeEvent::AgentStateChanged { state: to });
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        rejected.map_or(Ok(()), Err)
    }

    fn emit_resolved(&self, request: &PermissionRequest, decision: PermissionDecision) {
        self.events.emit(BridgeEvent::PermissionResolved {
            correlation_id: request.correlation_id.clone(),
            decision,
        });
    }

    /// A permission answer un-suspends the turn
    fn after_resolution(&self, request: &PermissionRequest, decision: PermissionDecision) {
        let _ = self.transition(&[AgentState::AwaitingPermission], AgentState::Prompting);
        self.emit_resolved(request, decision);
    }

    fn cancel_pending_permission(&self) {
        if let Some(request) = self.permissions.cancel_pending() {
            self.emit_resolved(&request, PermissionDecision::Cancelled);
        }
    }

    fn handle_inbound(self: &Arc<Self>, inbound: Inbound) {
        match inbound {
            Inbound::Notification { method, params } if method == methods::SESSION_UPDATE => {
                self.handle_update(params);
            }
            Inbound::Request { id, method, params }
                if method == methods::SESSION_REQUEST_PERMISSION =>
            {
                self.handle_permission_request(id, params);
            }
            Inbound::Request { id, method, .. } => {
                self.reply_error(&id, RpcError::method_not_found(&method));
            }
            Inbound::Notification { method, .. } => {
                log::debug!("Ignoring agent notification {method}");
            }
        }
    }

    fn handle_update(&self, params: Value) {
        let notification: SessionNotification = match serde_json::from_value(params) {
            Ok(notification) => notification,
            Err(e) => {
                log::warn!("Dropping undecodable session/update: {e}");
                return;
            }
        };
        if self.id.get() != Some(&notification.session_id) {
            log::debug!(
                "Dropping update for foreign session {}",
                notification.session_id
            );
            return;
        }

        let update = match notification.update {
            SessionUpdate::AgentMessageChunk { content } => {
                let Some(text) = content.text else {
                    log::trace!("Skipping non-text {} chunk", content.kind);
                    return;
                };
                self.turn.lock().text.push_str(&text);
                AgentUpdate::MessageChunk { text }
            }
            SessionUpdate::AgentThoughtChunk { content } => {
                let Some(text) = content.text else { return };
                AgentUpdate::ThoughtChunk { text }
            }
            SessionUpdate::UserMessageChunk { .. } => return,
            SessionUpdate::ToolCall(payload) => {
                let (tool_call, created) = self.tool_calls.lock().upsert_created(payload);
                if created {
                    AgentUpdate::ToolCallCreated { tool_call }
                } else {
                    log::debug!("Tool call {} announced twice; merged", tool_call.id);
                    AgentUpdate::ToolCallUpdated { tool_call }
                }
            }
            SessionUpdate::ToolCallUpdate(payload) => {
                let id = payload.tool_call_id.clone();
                let updated = self.tool_calls.lock().apply_update(payload);
                let Some(tool_call) = updated else {
                    log::debug!("Dropping update for unknown tool call {id}");
                    return;
                };
                AgentUpdate::ToolCallUpdated { tool_call }
            }
            SessionUpdate::Plan { entries } => AgentUpdate::Plan { entries },
            SessionUpdate::Unknown => {
                log::trace!("Ignoring unhandled session update kind");
                return;
            }
        };
        self.events.emit(BridgeEvent::AgentUpdate { update });
    }

    fn handle_permission_request(self: &Arc<Self>, id: RequestId, params: Value) {
        let parsed = serde_json::from_value::<RequestPermissionRequest>(params)
            .map_err(BridgeError::from)
            .and_then(|raw| raw.tool_call_ref().map(|tool_call| (raw, tool_call)));
        let (raw, tool_call) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Malformed permission request {id}: {e}");
                self.reply_error(&id, RpcError::invalid_params(e.to_string()));
                return;
            }
        };

        let request = PermissionRequest {
            correlation_id: id.clone(),
            tool_call_id: tool_call.tool_call_id,
            title: tool_call.title,
            tool_call: raw.tool_call,
            options: raw.options,
        };
        if let Err(e) = self.permissions.submit(request.clone()) {
            log::warn!("Rejecting permission request {id}: {e}");
            self.reply_error(&id, RpcError::internal(e.to_string()));
            return;
        }
        if let Err(state) = self.transition(&[AgentState::Prompting], AgentState::AwaitingPermission) {
            log::warn!("Permission request {id} arrived while {state}; cancelling it");
            if let Some(request) = self.permissions.resolve_if(&id, PermissionDecision::Cancelled) {
                self.emit_resolved(&request, PermissionDecision::Cancelled);
            }
            return;
        }
        self.events.emit(BridgeEvent::PermissionRequested { request });

        if let Some(timeout) = self.policy.permission_timeout {
            let weak = Arc::downgrade(self);
            tokio::spawn(expire_permission(weak, id, timeout));
        }
    }

    fn reply_error(&self, id: &RequestId, error: RpcError) {
        if let Err(e) = self.transport.respond(id, Err(error)) {
            log::debug!("Could not answer agent request {id}: {e}");
        }
    }

    /// Enter `Stopped`; later calls are no-ops
    fn finish(&self, reason: &str) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_pending_permission();
        self.tool_calls.lock().clear();
        self.state.send_if_modified(|state| {
            if *state == AgentState::Stopped {
                return false;
            }
            *state = AgentState::Stopped;
            self.events.emit(BridgeEvent::AgentStateChanged {
                state: AgentState::Stopped,
            });
            true
        });
        if let Some(id) = self.id.get() {
            log::info!("Agent session {id} stopped: {reason}");
        }
        self.events.emit(BridgeEvent::AgentStopped {
            reason: reason.to_string(),
        });
    }
}

async fn expire_permission(inner: Weak<SessionInner>, id: RequestId, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = inner.upgrade() else { return };
    if let Some(request) = inner.permissions.resolve_if(&id, PermissionDecision::Cancelled) {
        log::info!(
            "Permission request {id} unanswered after {}s; cancelled",
            timeout.as_secs()
        );
        inner.after_resolution(&request, PermissionDecision::Cancelled);
    }
}

async fn watch_connection(inner: Arc<SessionInner>) {
    let reason = inner.transport.closed().await;
    inner.finish(&reason);
}

/// A live conversation with one agent process
pub struct AgentSession {
    id: AgentSessionId,
    inner: Arc<SessionInner>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl AgentSession {
    /// Launch an agent for `workspace` and open a conversation
    ///
    /// Emits `Starting`, then `Ready` on success or `Idle` on failure.
    ///
    /// # Errors
    /// Returns error if the agent cannot be launched, initialized, or refuses
    /// `session/new`; the agent process is torn down in that case
    pub async fn start(
        launcher: &dyn AgentLauncher,
        workspace: &Path,
        events: EventSink,
        policy: SessionPolicy,
    ) -> Result<Self> {
        events.emit(BridgeEvent::AgentStateChanged {
            state: AgentState::Starting,
        });
        match Self::establish(launcher, workspace, events.clone(), policy).await {
            Ok(session) => Ok(session),
            Err(e) => {
                log::warn!("Agent start in {} failed: {e}", workspace.display());
                events.emit(BridgeEvent::AgentStateChanged {
                    state: AgentState::Idle,
                });
                Err(e)
            }
        }
    }

    async fn establish(
        launcher: &dyn AgentLauncher,
        workspace: &Path,
        events: EventSink,
        policy: SessionPolicy,
    ) -> Result<Self> {
        let transport = Arc::new(launcher.launch(workspace).await?);

        let (state, _) = watch::channel(AgentState::Starting);
        let responder: Arc<dyn PermissionResponder> = transport.clone();
        let inner = Arc::new(SessionInner {
            id: OnceLock::new(),
            workspace: workspace.to_path_buf(),
            transport: Arc::clone(&transport),
            state,
            permissions: PermissionCoordinator::new(responder),
            tool_calls: Mutex::new(ToolCallRegistry::new()),
            turn: Mutex::new(Turn::default()),
            events,
            policy,
            finished: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let handler: InboundHandler = Arc::new(move |inbound: Inbound| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(inbound);
            }
        });
        transport.on_notification(methods::SESSION_UPDATE, Arc::clone(&handler));
        transport.on_notification(methods::SESSION_REQUEST_PERMISSION, handler);

        let request = NewSessionRequest {
            cwd: workspace.to_path_buf(),
            mcp_servers: Vec::new(),
        };
        let created = tokio::time::timeout(
            inner.policy.setup_timeout,
            transport.call::<_, NewSessionResponse>(methods::SESSION_NEW, &request),
        )
        .await
        .unwrap_or_else(|_| Err(BridgeError::timeout("agent did not answer session/new")));
        let created = match created {
            Ok(created) => created,
            Err(e) => {
                transport.disconnect().await;
                return Err(e);
            }
        };

        let id = created.session_id;
        let _ = inner.id.set(id.clone());
        let _ = inner.transition(&[AgentState::Starting], AgentState::Ready);
        log::info!("Agent session {id} ready in {}", workspace.display());

        let watcher = tokio::spawn(watch_connection(Arc::clone(&inner)));
        Ok(Self {
            id,
            inner,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Agent-assigned session id
    #[must_use]
    pub fn id(&self) -> &AgentSessionId {
        &self.id
    }

    /// Workspace the agent was started in
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.inner.workspace
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.inner.state()
    }

    /// Watch state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.inner.state.subscribe()
    }

    /// What the agent reported in `initialize`
    #[must_use]
    pub fn agent_capabilities(&self) -> AgentCapabilities {
        self.inner.transport.handler().agent_capabilities()
    }

    /// The permission request awaiting a decision, if any
    #[must_use]
    pub fn pending_permission(&self) -> Option<PermissionRequest> {
        self.inner.permissions.pending()
    }

    /// Tool calls seen so far, oldest first
    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.inner.tool_calls.lock().timeline()
    }

    /// Run one turn
    ///
    /// Streams updates as events while waiting. A `cancel` resolves the turn
    /// with [`StopReason::Cancelled`] rather than an error.
    ///
    /// # Errors
    /// Returns `InvalidState` unless the session is `Ready`, `ProcessExited`
    /// if the agent dies or the session is stopped, or the agent's error
    pub async fn prompt(&self, text: &str, context: Vec<ContextSnapshot>) -> Result<TurnResult> {
        let inner = &self.inner;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let seq = {
            let mut turn = inner.turn.lock();
            inner
                .transition(&[AgentState::Ready], AgentState::Prompting)
                .map_err(|state| BridgeError::invalid_state("prompt", state))?;
            turn.seq += 1;
            turn.text.clear();
            turn.cancel = Some(cancel_tx);
            turn.seq
        };

        let mut prompt = Vec::with_capacity(context.len() + 1);
        prompt.push(ContentBlock::text(text));
        prompt.extend(
            context
                .into_iter()
                .map(|snapshot| snapshot.into_block(inner.policy.context_limit)),
        );
        let request = PromptRequest {
            session_id: self.id.clone(),
            prompt,
        };

        let outcome = Self::run_turn(&inner.transport, &request, cancel_rx).await;

        let mut turn = inner.turn.lock();
        if turn.seq != seq {
            // Cancelled, and a newer turn already owns the bookkeeping
            return outcome.map(|stop_reason| TurnResult {
                stop_reason,
                text: String::new(),
            });
        }
        turn.cancel = None;
        let text = std::mem::take(&mut turn.text);
        match outcome {
            Ok(stop_reason) => {
                inner.cancel_pending_permission();
                let _ = inner.transition(
                    &[AgentState::Prompting, AgentState::AwaitingPermission],
                    AgentState::Ready,
                );
                log::debug!("Turn {seq} ended: {stop_reason:?}");
                Ok(TurnResult { stop_reason, text })
            }
            Err(e) if e.is_process_exit() => Err(e),
            Err(e) => {
                log::warn!("Prompt failed: {e}");
                inner.cancel_pending_permission();
                let _ = inner.transition(
                    &[AgentState::Prompting, AgentState::AwaitingPermission],
                    AgentState::Ready,
                );
                Err(e)
            }
        }
    }

    async fn run_turn(
        transport: &AgentTransport,
        request: &PromptRequest,
        cancel_rx: oneshot::Receiver<()>,
    ) -> Result<StopReason> {
        let pending = transport.request(methods::SESSION_PROMPT, serde_json::to_value(request)?)?;
        tokio::select! {
            response = pending => {
                let response: PromptResponse = serde_json::from_value(response?)?;
                Ok(response.stop_reason)
            }
            // Dropping `pending` abandons the slot; a late answer is ignored
            Ok(()) = cancel_rx => Ok(StopReason::Cancelled),
        }
    }

    /// Abort the running turn
    ///
    /// Answers a pending permission as cancelled, tells the agent to stop and
    /// returns the session to `Ready`. The agent process keeps running.
    ///
    /// # Errors
    /// Returns `InvalidState` unless a turn is in flight
    pub fn cancel(&self) -> Result<()> {
        let inner = &self.inner;
        let mut turn = inner.turn.lock();
        let state = inner.state();
        if !state.is_turn_active() {
            return Err(BridgeError::invalid_state("cancel", state));
        }
        inner.cancel_pending_permission();

        let notice = serde_json::to_value(CancelNotification {
            session_id: self.id.clone(),
        })?;
        if let Err(e) = inner.transport.notify(methods::SESSION_CANCEL, notice) {
            log::warn!("Could not send session/cancel: {e}");
        }
        if let Some(tx) = turn.cancel.take() {
            let _ = tx.send(());
        }
        let _ = inner.transition(
            &[AgentState::Prompting, AgentState::AwaitingPermission],
            AgentState::Ready,
        );
        log::info!("Turn {} cancelled", turn.seq);
        Ok(())
    }

    /// Answer the pending permission request
    ///
    /// # Errors
    /// Returns `NoPendingPermission` or `UnknownPermissionOption`
    pub fn respond_permission(&self, decision: PermissionDecision) -> Result<()> {
        let request = self.inner.permissions.resolve(decision.clone())?;
        self.inner.after_resolution(&request, decision);
        Ok(())
    }

    /// Whether the session has reached `Stopped`
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.state() == AgentState::Stopped
    }

    /// Tear the session down; idempotent
    ///
    /// A pending permission is answered as cancelled before the transport
    /// closes; every outstanding request then fails with `ProcessExited`.
    pub async fn stop(&self, reason: &str) {
        self.inner.finish(reason);
        self.inner.transport.disconnect().await;
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher
            && let Err(e) = watcher.await
            && !e.is_cancelled()
        {
            log::error!("Agent connection watcher panicked: {e}");
        }
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.id)
            .field("workspace", &self.inner.workspace)
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}
