//! JSON-RPC connection to a running agent

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{BridgeError, Result};
use crate::protocol::{
    IncomingMessage, InitializeResponse, ProtocolHandler, RpcError, methods, notification_frame,
    request_frame, response_frame,
};
use crate::types::RequestId;

use super::codec::{Frame, JsonLineCodec};
use super::subprocess::AgentProcess;

/// Time allowed for queued frames to flush when disconnecting
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Time allowed for the agent process to exit after stdin closes
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Callback receiving agent-initiated traffic for one or more methods
pub type InboundHandler = Arc<dyn Fn(Inbound) + Send + Sync>;

/// Agent-initiated traffic delivered to a registered handler
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Fire-and-forget message
    Notification {
        /// Method name
        method: String,
        /// Parameters
        params: Value,
    },
    /// Request that must be answered with [`AgentTransport::respond`]
    Request {
        /// Correlation id to answer with
        id: RequestId,
        /// Method name
        method: String,
        /// Parameters
        params: Value,
    },
}

impl Inbound {
    /// Method name
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Notification { method, .. } | Self::Request { method, .. } => method,
        }
    }
}

/// Connection liveness as broadcast to watchers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames are flowing
    Open,
    /// The connection ended, with the reason
    Closed(String),
}

/// State shared with the reader and writer tasks
struct Shared {
    handler: ProtocolHandler,
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    routes: Mutex<HashMap<String, InboundHandler>>,
    state: watch::Sender<ConnectionState>,
    ready: AtomicBool,
}

impl Shared {
    fn send(&self, frame: Value) -> Result<()> {
        let outbound = self.outbound.lock();
        let tx = outbound
            .as_ref()
            .ok_or_else(|| BridgeError::process_exited("connection closed"))?;
        tx.send(frame)
            .map_err(|_| BridgeError::process_exited("agent stdin closed"))
    }

    /// The single place a connection ends; later calls are no-ops
    fn close(&self, reason: &str) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return;
        }
        let failed = self.handler.fail_all(reason);
        log::info!("Agent connection closed ({reason}); failed {failed} pending request(s)");
        // Release whatever the handlers captured
        self.routes.lock().clear();
        self.state.send_replace(ConnectionState::Closed(reason.to_string()));
    }

    fn dispatch(&self, value: Value) {
        let message = match IncomingMessage::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping unusable agent frame: {e}");
                return;
            }
        };

        match message {
            IncomingMessage::Response { id, result } => {
                if !self.handler.resolve(&id, result) {
                    log::debug!("Response for unknown or abandoned request {id}");
                }
            }
            IncomingMessage::Notification { method, params } => {
                self.route(Inbound::Notification { method, params });
            }
            IncomingMessage::Request { id, method, params } => {
                let inbound = Inbound::Request {
                    id: id.clone(),
                    method: method.clone(),
                    params,
                };
                if !self.route(inbound) {
                    let reply = response_frame(&id, Err(RpcError::method_not_found(&method)));
                    if let Err(e) = self.send(reply) {
                        log::debug!("Could not reject {method}: {e}");
                    }
                }
            }
        }
    }

    /// Run the handler registered for the method; false if none
    fn route(&self, inbound: Inbound) -> bool {
        let handler = self.routes.lock().get(inbound.method()).cloned();
        let Some(handler) = handler else {
            log::debug!("No route for agent method {}; dropping", inbound.method());
            return false;
        };
        handler(inbound);
        true
    }
}

/// Bidirectional JSON-RPC connection to an agent
///
/// One reader task decodes stdout and demultiplexes it: responses complete
/// pending slots in the [`ProtocolHandler`]; notifications and agent requests
/// go to handlers registered with [`on_notification`](Self::on_notification).
/// One writer task owns stdin. All methods take `&self`.
pub struct AgentTransport {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    process: Mutex<Option<AgentProcess>>,
    disconnected: AtomicBool,
}

impl AgentTransport {
    /// Start the reader and writer tasks over an arbitrary byte stream pair
    pub fn from_streams<R, W>(reader: R, writer: W, max_frame_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let shared = Arc::new(Shared {
            handler: ProtocolHandler::new(),
            outbound: Mutex::new(Some(out_tx)),
            routes: Mutex::new(HashMap::new()),
            state: state_tx,
            ready: AtomicBool::new(true),
        });

        let frames = FramedRead::new(reader, JsonLineCodec::new(max_frame_size));
        let reader_task = tokio::spawn(read_loop(frames, Arc::clone(&shared)));

        let sink = FramedWrite::new(writer, JsonLineCodec::new(max_frame_size));
        let writer_task = tokio::spawn(write_loop(sink, out_rx, Arc::clone(&shared)));

        Self {
            shared,
            state_rx,
            reader_task: Mutex::new(Some(reader_task)),
            writer_task: Mutex::new(Some(writer_task)),
            process: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Hand ownership of the agent process to this connection
    pub fn attach_process(&self, process: AgentProcess) {
        *self.process.lock() = Some(process);
    }

    /// Route inbound messages for `method` to `handler`
    ///
    /// Handlers run on the reader task in arrival order, so everything the
    /// agent sent before a response has been handled by the time that
    /// response is delivered. They must not block. Replaces any earlier
    /// route for the same method; all routes are dropped when the
    /// connection closes.
    pub fn on_notification(&self, method: &str, handler: InboundHandler) {
        self.shared.routes.lock().insert(method.to_string(), handler);
    }

    /// Check if the connection is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Correlation state, mostly for diagnostics
    #[must_use]
    pub fn handler(&self) -> &ProtocolHandler {
        &self.shared.handler
    }

    /// Watch connection liveness
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Resolves with the reason once the connection has ended
    pub async fn closed(&self) -> String {
        let mut rx = self.state_rx.clone();
        loop {
            if let ConnectionState::Closed(reason) = &*rx.borrow_and_update() {
                return reason.clone();
            }
            if rx.changed().await.is_err() {
                return "connection dropped".to_string();
            }
        }
    }

    /// Send a request; the returned handle resolves with its response
    ///
    /// Dropping the handle abandons the request; a late response is ignored.
    ///
    /// # Errors
    /// Returns `ProcessExited` if the connection is already closed
    pub fn request(&self, method: &str, params: Value) -> Result<PendingResponse> {
        let (id, rx) = self.shared.handler.register()?;
        log::debug!("-> {method} (id {id})");
        if let Err(e) = self.shared.send(request_frame(&id, method, params)) {
            self.shared.handler.forget(&id);
            return Err(e);
        }
        Ok(PendingResponse {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            done: false,
        })
    }

    /// Send a request and decode its result
    ///
    /// # Errors
    /// Returns the agent's error, `ProcessExited`, or `JsonDecode`
    pub async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: &P) -> Result<T> {
        let value = self.request(method, serde_json::to_value(params)?)?.await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification
    ///
    /// # Errors
    /// Returns `ProcessExited` if the connection is closed
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        log::debug!("-> {method} (notification)");
        self.shared.send(notification_frame(method, params))
    }

    /// Answer a request the agent sent
    ///
    /// # Errors
    /// Returns `ProcessExited` if the connection is closed
    pub fn respond(&self, id: &RequestId, result: std::result::Result<Value, RpcError>) -> Result<()> {
        log::debug!("-> response (id {id})");
        self.shared.send(response_frame(id, result))
    }

    /// Perform the `initialize` handshake
    ///
    /// # Errors
    /// Returns `Timeout` if the agent does not answer in time, `Protocol` on a
    /// version mismatch, or whatever error the agent returned
    pub async fn initialize(&self, timeout: Duration) -> Result<InitializeResponse> {
        let request = self.shared.handler.create_init_request();
        let response: InitializeResponse =
            tokio::time::timeout(timeout, self.call(methods::INITIALIZE, &request))
                .await
                .map_err(|_| {
                    BridgeError::timeout(format!(
                        "agent did not answer initialize within {}s",
                        timeout.as_secs_f32()
                    ))
                })??;
        self.shared.handler.handle_init_response(&response)?;
        log::info!(
            "Agent initialized (protocol {}, capabilities {:?})",
            response.protocol_version,
            response.agent_capabilities
        );
        Ok(response)
    }

    /// Tear the connection down; idempotent
    ///
    /// Fails every outstanding request with `ProcessExited`, closes the
    /// agent's stdin, waits briefly for it to exit and kills it otherwise.
    pub async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.close("session ended");

        // Let queued frames (e.g. a final cancel) reach the agent, then EOF stdin
        self.shared.outbound.lock().take();
        let writer = self.writer_task.lock().take();
        if let Some(mut task) = writer
            && tokio::time::timeout(FLUSH_GRACE, &mut task).await.is_err()
        {
            task.abort();
        }

        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }

        let process = self.process.lock().take();
        if let Some(mut process) = process {
            process.shutdown(EXIT_GRACE).await;
        }
    }
}

impl Drop for AgentTransport {
    fn drop(&mut self) {
        self.shared.close("transport dropped");
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().take() {
            task.abort();
        }
        // AgentProcess::drop sends the kill
    }
}

/// Outstanding request handle returned by [`AgentTransport::request`]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
    shared: Arc<Shared>,
    done: bool,
}

impl PendingResponse {
    /// Correlation id of the request
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.done = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.done = true;
                Poll::Ready(Err(BridgeError::process_exited("response slot dropped")))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.done {
            self.shared.handler.forget(&self.id);
        }
    }
}

async fn read_loop<R>(mut frames: FramedRead<R, JsonLineCodec>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Message(value)) => {
                log::trace!("<- {value}");
                shared.dispatch(value);
            }
            Ok(Frame::Malformed { raw, error }) => {
                log::warn!("Skipping malformed agent output ({error}): {raw:.200}");
            }
            Err(e) => {
                log::warn!("Agent stdout read failed: {e}");
                break;
            }
        }
    }
    shared.close("agent process exited");
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, JsonLineCodec>,
    mut rx: mpsc::UnboundedReceiver<Value>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            log::warn!("Agent stdin write failed: {e}");
            shared.close("agent stdin closed");
            return;
        }
    }
    if let Err(e) = sink.close().await {
        log::debug!("Closing agent stdin: {e}");
    }
}
