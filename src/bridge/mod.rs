//! Newline-delimited JSON surface for the UI process
//!
//! Commands arrive one per line on the input stream; replies and events
//! leave one per line on the output stream through a single writer task, so
//! lines never interleave.
//!
//! ```text
//! -> {"command":"terminal.open","requestId":1}
//! <- {"reply":1,"ok":true,"result":{"id":"t1"}}
//! <- {"event":"terminal.data","id":"t1","data":"$ "}
//! ```

mod command;

use std::sync::Arc;

use futures::{SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use crate::agent::{AgentManager, SessionPolicy};
use crate::error::Result;
use crate::terminal::TerminalManager;
use crate::transport::{AgentLauncher, Frame, JsonLineCodec, subprocess::probe_auth};
use crate::types::{BridgeEvent, BridgeOptions, ContextSnapshot, EventSink};

pub use command::{Command, Dispatch, Incoming, reply_frame};

/// Terminals plus the agent, addressed by [`Command`]s
pub struct Bridge {
    options: BridgeOptions,
    terminals: TerminalManager,
    agent: AgentManager,
    events: EventSink,
}

impl Bridge {
    /// Create a bridge reporting to `events`
    pub fn new(options: BridgeOptions, launcher: Arc<dyn AgentLauncher>, events: EventSink) -> Self {
        let terminals = TerminalManager::new(options.terminal.clone(), events.clone());
        let agent = AgentManager::new(
            launcher,
            SessionPolicy::from_options(&options),
            events.clone(),
        );
        Self {
            options,
            terminals,
            agent,
            events,
        }
    }

    /// Terminal sessions
    #[must_use]
    pub const fn terminals(&self) -> &TerminalManager {
        &self.terminals
    }

    /// Agent session owner
    #[must_use]
    pub const fn agent(&self) -> &AgentManager {
        &self.agent
    }

    /// Run one command to completion
    ///
    /// # Errors
    /// Returns whatever the addressed component reports
    pub async fn execute(&self, command: Command) -> Result<Value> {
        match command {
            Command::TerminalOpen { cwd } => {
                let id = self.terminals.open(cwd).await?;
                Ok(json!({ "id": id }))
            }
            Command::TerminalWrite { id, data } => {
                self.terminals.write(&id, data.as_bytes());
                Ok(Value::Null)
            }
            Command::TerminalResize { id, cols, rows } => {
                self.terminals.resize(&id, cols, rows);
                Ok(Value::Null)
            }
            Command::TerminalClose { id } => {
                self.terminals.close(&id).await;
                Ok(Value::Null)
            }
            Command::TerminalSnapshot { id } => Ok(json!({ "text": self.terminals.snapshot(&id) })),
            Command::TerminalCwd { id } => Ok(json!({ "cwd": self.terminals.cwd(&id) })),
            Command::TerminalList => Ok(serde_json::to_value(self.terminals.list())?),
            Command::AgentStart { workspace_path } => {
                let session_id = self.agent.start(&workspace_path).await?;
                Ok(json!({ "sessionId": session_id }))
            }
            Command::AgentStop => {
                self.agent.stop().await;
                Ok(Value::Null)
            }
            Command::AgentPrompt { text, context } => {
                let snapshots = context
                    .into_iter()
                    .filter_map(|id| match self.terminals.snapshot(&id) {
                        Some(text) => Some(ContextSnapshot::new(id, text)),
                        None => {
                            log::debug!("Context terminal {id} does not exist; skipped");
                            None
                        }
                    })
                    .collect();
                let turn = self.agent.prompt(&text, snapshots).await?;
                Ok(serde_json::to_value(turn)?)
            }
            Command::AgentCancel => {
                self.agent.cancel()?;
                Ok(Value::Null)
            }
            Command::AgentStatus => Ok(serde_json::to_value(self.agent.status())?),
            Command::PermissionResponse { option_id, cancel } => {
                self.agent
                    .respond_permission(Command::decision(option_id, cancel)?)?;
                Ok(Value::Null)
            }
            Command::AgentAuth => Ok(serde_json::to_value(probe_auth(&self.options.agent).await?)?),
        }
    }

    /// Stop the agent and every terminal
    pub async fn shutdown(&self) {
        self.agent.shutdown().await;
        self.terminals.shutdown().await;
    }

    /// Serve commands from `input` until it closes, writing to `output`
    ///
    /// Terminal commands and quick agent commands run in arrival order.
    /// `agent.start`/`agent.stop` run in arrival order on a separate worker,
    /// and prompts run concurrently so `agent.cancel` and permission answers
    /// are never stuck behind them.
    ///
    /// # Errors
    /// Returns error if the output stream fails
    pub async fn serve<R, W>(
        self: Arc<Self>,
        events_rx: mpsc::UnboundedReceiver<BridgeEvent>,
        input: R,
        output: W,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let max_line = self.options.agent.max_frame_size;
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let sink = FramedWrite::new(output, JsonLineCodec::new(max_line));
        let writer = tokio::spawn(write_output(sink, events_rx, reply_rx));

        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let lifecycle = tokio::spawn(lifecycle_worker(
            Arc::clone(&self),
            lifecycle_rx,
            reply_tx.clone(),
        ));

        self.events.emit(BridgeEvent::Ready {
            instance_id: Uuid::new_v4(),
            version: crate::VERSION,
        });
        log::info!("Bridge ready");

        let commands = incoming(input, max_line);
        futures::pin_mut!(commands);
        while let Some(incoming) = commands.next().await {
            let (request_id, command) = match incoming {
                Incoming::Command {
                    request_id,
                    command,
                } => (request_id, command),
                Incoming::Invalid { request_id, error } => {
                    log::warn!("Rejecting command {request_id}: {error}");
                    let _ = reply_tx.send(reply_frame(&request_id, Err(error)));
                    continue;
                }
            };
            log::debug!("Command {request_id}: {command:?}");

            match command.dispatch() {
                Dispatch::Inline => {
                    let result = self.execute(command).await;
                    let _ = reply_tx.send(reply_frame(&request_id, result));
                }
                Dispatch::Lifecycle => {
                    let _ = lifecycle_tx.send((request_id, command));
                }
                Dispatch::Detached => {
                    let bridge = Arc::clone(&self);
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        let result = bridge.execute(command).await;
                        let _ = reply_tx.send(reply_frame(&request_id, result));
                    });
                }
            }
        }

        log::info!("Command input closed; shutting down");
        drop(lifecycle_tx);
        if let Err(e) = lifecycle.await {
            log::error!("Lifecycle worker failed: {e}");
        }
        self.shutdown().await;
        drop(reply_tx);

        match writer.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Output writer failed: {e}");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("terminals", &self.terminals.len())
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

fn incoming<R>(input: R, max_line: usize) -> impl Stream<Item = Incoming>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async_stream::stream! {
        let mut frames = FramedRead::new(input, JsonLineCodec::new(max_line));
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Frame::Message(value)) => yield Incoming::parse(value),
                Ok(Frame::Malformed { raw, error }) => {
                    log::warn!("Skipping malformed command line ({error}): {raw:.200}");
                }
                Err(e) => {
                    log::warn!("Reading commands failed: {e}");
                    break;
                }
            }
        }
    }
}

async fn lifecycle_worker(
    bridge: Arc<Bridge>,
    mut rx: mpsc::UnboundedReceiver<(Value, Command)>,
    reply_tx: mpsc::UnboundedSender<Value>,
) {
    while let Some((request_id, command)) = rx.recv().await {
        let result = bridge.execute(command).await;
        let _ = reply_tx.send(reply_frame(&request_id, result));
    }
}

/// Single writer for the output stream
///
/// Ends once every reply sender is gone, after flushing queued events.
async fn write_output<W>(
    mut sink: FramedWrite<W, JsonLineCodec>,
    mut events: mpsc::UnboundedReceiver<BridgeEvent>,
    mut replies: mpsc::UnboundedReceiver<Value>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            reply = replies.recv() => match reply {
                Some(reply) => sink.send(reply).await?,
                None => break,
            },
            Some(event) = events.recv() => sink.send(serde_json::to_value(&event)?).await?,
        }
    }
    while let Ok(event) = events.try_recv() {
        sink.send(serde_json::to_value(&event)?).await?;
    }
    sink.close().await?;
    Ok(())
}
