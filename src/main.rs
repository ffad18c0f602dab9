// termbridge: terminal and coding-agent bridge for a desktop UI.
//
// Reads newline-delimited JSON commands on stdin and writes replies and
// events to stdout. Logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use termbridge::{Bridge, BridgeOptions, EventSink, SubprocessLauncher};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let options = BridgeOptions::from_env().context("invalid TERMBRIDGE_* configuration")?;
    log::info!(
        "termbridge {} (shell {}, logs in {})",
        termbridge::VERSION,
        options.terminal.shell.display(),
        options.terminal.log_dir.display()
    );

    let (events, events_rx) = EventSink::channel();
    let launcher = Arc::new(SubprocessLauncher::new(options.agent.clone()));
    let bridge = Arc::new(Bridge::new(options, launcher, events));

    bridge
        .serve(events_rx, tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("bridge output failed")?;

    log::info!("termbridge exiting");
    Ok(())
}
