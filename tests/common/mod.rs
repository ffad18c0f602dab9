//! Shared helpers: an in-memory agent speaking JSON-RPC over a duplex pipe

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use termbridge::agent::{AgentManager, SessionPolicy};
use termbridge::transport::{AgentLauncher, AgentTransport, DEFAULT_MAX_FRAME_SIZE};
use termbridge::types::{BridgeEvent, EventSink};

/// How long a test waits for any single frame or event
pub const STEP: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The agent end of a duplex pipe
pub struct FakeAgent {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeAgent {
    /// A connected pair: the client transport and the scripted agent
    pub fn pair() -> (AgentTransport, Self) {
        let (client, agent) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = AgentTransport::from_streams(client_read, client_write, DEFAULT_MAX_FRAME_SIZE);
        let (agent_read, agent_write) = tokio::io::split(agent);
        let agent = Self {
            lines: BufReader::new(agent_read).lines(),
            writer: agent_write,
        };
        (transport, agent)
    }

    /// Next frame from the client; `None` once it closed its end
    pub async fn recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(STEP, self.lines.next_line())
            .await
            .expect("timed out waiting for a client frame")
            .expect("read from client failed")?;
        Some(serde_json::from_str(&line).expect("client wrote invalid JSON"))
    }

    /// Next frame, which must be a request for `method`; returns `(id, params)`
    pub async fn expect_request(&mut self, method: &str) -> (Value, Value) {
        let frame = self.recv().await.expect("client closed the connection");
        assert_eq!(frame["method"], json!(method), "unexpected frame {frame}");
        assert!(frame.get("id").is_some(), "{method} should be a request: {frame}");
        (frame["id"].clone(), frame["params"].clone())
    }

    /// Next frame, which must be a notification for `method`
    pub async fn expect_notification(&mut self, method: &str) -> Value {
        let frame = self.recv().await.expect("client closed the connection");
        assert_eq!(frame["method"], json!(method), "unexpected frame {frame}");
        assert!(frame.get("id").is_none(), "{method} should be a notification: {frame}");
        frame["params"].clone()
    }

    /// Next frame, which must be a response to `id`; returns the whole frame
    pub async fn expect_response(&mut self, id: &Value) -> Value {
        let frame = self.recv().await.expect("client closed the connection");
        assert_eq!(&frame["id"], id, "unexpected frame {frame}");
        assert!(frame.get("method").is_none(), "expected a response: {frame}");
        frame
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.expect("write to client");
        self.writer.flush().await.expect("flush to client");
    }

    pub async fn send(&mut self, frame: Value) {
        self.send_raw(&format!("{frame}\n")).await;
    }

    pub async fn respond(&mut self, id: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result })).await;
    }

    pub async fn respond_error(&mut self, id: &Value, code: i64, message: &str) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } }))
            .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params })).await;
    }

    pub async fn request(&mut self, id: Value, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
    }

    /// Send a `session/update`
    pub async fn update(&mut self, session_id: &str, update: Value) {
        self.notify("session/update", json!({ "sessionId": session_id, "update": update }))
            .await;
    }

    /// Answer `initialize` the way a v1 agent does
    pub async fn accept_initialize(&mut self) {
        let (id, params) = self.expect_request("initialize").await;
        assert_eq!(params["protocolVersion"], json!(1));
        self.respond(
            &id,
            json!({
                "protocolVersion": 1,
                "agentCapabilities": { "loadSession": false, "promptCapabilities": { "embeddedContext": true } },
                "authMethods": []
            }),
        )
        .await;
    }

    /// Answer `initialize` and `session/new`
    pub async fn accept_session(&mut self, session_id: &str) -> Value {
        self.accept_initialize().await;
        let (id, params) = self.expect_request("session/new").await;
        self.respond(&id, json!({ "sessionId": session_id })).await;
        params
    }

    /// Wait until the client closes its end
    pub async fn expect_closed(&mut self) {
        loop {
            if self.recv().await.is_none() {
                return;
            }
        }
    }

    /// Simulate the agent process exiting
    pub async fn exit(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Launcher handing each fresh [`FakeAgent`] to the test
pub struct DuplexLauncher {
    agents: mpsc::UnboundedSender<FakeAgent>,
}

impl DuplexLauncher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeAgent>) {
        let (agents, rx) = mpsc::unbounded_channel();
        (Self { agents }, rx)
    }
}

impl AgentLauncher for DuplexLauncher {
    fn launch<'a>(&'a self, _workspace: &'a Path) -> BoxFuture<'a, termbridge::Result<AgentTransport>> {
        Box::pin(async move {
            let (transport, agent) = FakeAgent::pair();
            self.agents
                .send(agent)
                .map_err(|_| termbridge::BridgeError::spawn("test dropped the agent receiver"))?;
            transport.initialize(STEP).await?;
            Ok(transport)
        })
    }
}

/// A manager wired to fake agents and a captured event stream
pub struct Harness {
    pub manager: Arc<AgentManager>,
    pub agents: mpsc::UnboundedReceiver<FakeAgent>,
    pub events: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl Harness {
    pub fn new(policy: SessionPolicy) -> Self {
        init_logging();
        let (launcher, agents) = DuplexLauncher::new();
        let (sink, events) = EventSink::channel();
        let manager = Arc::new(AgentManager::new(Arc::new(launcher), policy, sink));
        Self {
            manager,
            agents,
            events,
        }
    }

    /// Start a session and return the agent driving it
    pub async fn start(&mut self, workspace: &str, session_id: &str) -> FakeAgent {
        let manager = Arc::clone(&self.manager);
        let workspace = workspace.to_string();
        let started = tokio::spawn(async move { manager.start(Path::new(&workspace)).await });

        let mut agent = tokio::time::timeout(STEP, self.agents.recv())
            .await
            .expect("launcher was not called")
            .expect("launcher dropped");
        agent.accept_session(session_id).await;

        let id = started.await.expect("start task panicked").expect("start failed");
        assert_eq!(id.as_str(), session_id);
        agent
    }

    /// Next event matching `pred`, skipping others
    pub async fn next_event(&mut self, pred: impl Fn(&BridgeEvent) -> bool) -> BridgeEvent {
        loop {
            let event = tokio::time::timeout(STEP, self.events.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    }

    /// Every event emitted so far
    pub fn drain_events(&mut self) -> Vec<BridgeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A `session/request_permission` params body offering allow/reject
pub fn permission_params(session_id: &str, tool_call_id: &str) -> Value {
    json!({
        "sessionId": session_id,
        "toolCall": { "toolCallId": tool_call_id, "title": "Run rm -rf build" },
        "options": [
            { "optionId": "allow", "name": "Allow once", "kind": "allow_once" },
            { "optionId": "always", "name": "Always allow", "kind": "allow_always" },
            { "optionId": "reject", "name": "Reject", "kind": "reject_once" }
        ]
    })
}
