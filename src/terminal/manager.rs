//! Multiplexer over PTY-backed shell sessions

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{BridgeError, Result};
use crate::types::options::home_dir;
use crate::types::{BridgeEvent, EventSink, TerminalId, TerminalOptions};

use super::buffer::{LogSink, OutputBuffer, SessionOutput};
use super::cwd::process_cwd;
use super::pty::{self, PtyChild, PtyProcess, PtySpawn, PtyStreams};
use super::title::TitleScanner;

/// A shell that dies this quickly counts towards the respawn limit
const QUICK_EXIT: Duration = Duration::from_secs(1);

/// Consecutive quick exits after which the last terminal is not respawned
const MAX_QUICK_RESPAWNS: u32 = 3;

/// How long an exit waits for the reader to drain the shell's last output
const DRAIN_GRACE: Duration = Duration::from_millis(250);

// ============================================================================
// Session
// ============================================================================

/// Listing entry returned by [`TerminalManager::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    /// Terminal id
    pub id: TerminalId,
    /// Log file path
    pub log_path: PathBuf,
    /// Current title
    pub title: String,
    /// Whether the shell process is running
    pub alive: bool,
}

struct TerminalSession {
    id: TerminalId,
    seq: u64,
    log_path: PathBuf,
    output: Mutex<SessionOutput>,
    process: Mutex<Option<PtyProcess>>,
    /// Bumped whenever the process exits, is replaced or the session is
    /// closed, so threads serving an older process stand down
    generation: AtomicU64,
    alive: AtomicBool,
    cwd: Mutex<PathBuf>,
    title: Mutex<String>,
    size: Mutex<(u16, u16)>,
    spawned_at: Mutex<Instant>,
    quick_exits: AtomicU32,
}

impl TerminalSession {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn info(&self) -> TerminalInfo {
        TerminalInfo {
            id: self.id.clone(),
            log_path: self.log_path.clone(),
            title: self.title.lock().clone(),
            alive: self.alive.load(Ordering::SeqCst),
        }
    }

    /// Kill the process and release the log; the session is unusable after
    fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        let process = self.process.lock().take();
        if let Some(mut process) = process {
            process.kill();
        }
        self.output.lock().log.close();
    }
}

// ============================================================================
// Manager
// ============================================================================

struct Inner {
    options: TerminalOptions,
    events: EventSink,
    sessions: Mutex<HashMap<TerminalId, Arc<TerminalSession>>>,
    next_seq: AtomicU64,
}

/// Owns every terminal session
///
/// Sessions are keyed by [`TerminalId`]. Each has one dedicated reader thread
/// that is the only writer to its buffer and log. Dropping the manager kills
/// every remaining shell.
pub struct TerminalManager {
    inner: Arc<Inner>,
}

impl TerminalManager {
    /// Create a manager that reports to `events`
    #[must_use]
    pub fn new(options: TerminalOptions, events: EventSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                events,
                sessions: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Spawn a shell rooted at `cwd` (the user's home when `None`)
    ///
    /// # Errors
    /// Returns `Spawn` with the OS error if the shell cannot be started, or
    /// an I/O error if the log file cannot be created. No session exists
    /// afterwards in either case.
    pub async fn open(&self, cwd: Option<PathBuf>) -> Result<TerminalId> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || Inner::open(&inner, cwd))
            .await
            .map_err(|e| BridgeError::spawn(format!("terminal open task failed: {e}")))?
    }

    /// Queue raw input bytes; silently ignored for unknown or dead sessions
    ///
    /// Never blocks: the bytes are handed to the session's input thread.
    pub fn write(&self, id: &TerminalId, data: &[u8]) {
        let Some(session) = self.inner.get(id) else {
            log::debug!("write to unknown terminal {id} ignored");
            return;
        };
        if let Some(process) = session.process.lock().as_ref()
            && let Err(e) = process.write(data)
        {
            log::debug!("write to terminal {id} failed: {e}");
        }
    }

    /// Resize the PTY; dimensions are clamped to at least 1
    pub fn resize(&self, id: &TerminalId, cols: u16, rows: u16) {
        let Some(session) = self.inner.get(id) else {
            return;
        };
        let (cols, rows) = (cols.max(1), rows.max(1));
        *session.size.lock() = (cols, rows);
        if let Some(process) = session.process.lock().as_ref()
            && let Err(e) = process.resize(cols, rows)
        {
            log::debug!("resize of terminal {id} failed: {e}");
        }
    }

    /// Kill the shell and release the session; idempotent
    pub async fn close(&self, id: &TerminalId) {
        let Some(session) = self.inner.sessions.lock().remove(id) else {
            return;
        };
        log::info!("Closing terminal {id}");
        if let Err(e) = tokio::task::spawn_blocking(move || session.shutdown()).await {
            log::error!("terminal {id} teardown panicked: {e}");
        }
    }

    /// Current buffer contents
    #[must_use]
    pub fn snapshot(&self, id: &TerminalId) -> Option<String> {
        self.inner.get(id).map(|s| s.output.lock().buffer.snapshot())
    }

    /// Best-effort working directory, falling back to the last known one
    #[must_use]
    pub fn cwd(&self, id: &TerminalId) -> Option<PathBuf> {
        let session = self.inner.get(id)?;
        let pid = session.process.lock().as_ref().and_then(PtyProcess::pid);
        if session.alive.load(Ordering::SeqCst)
            && let Some(current) = pid.and_then(process_cwd)
        {
            *session.cwd.lock() = current;
        }
        Some(session.cwd.lock().clone())
    }

    /// All sessions in creation order
    #[must_use]
    pub fn list(&self) -> Vec<TerminalInfo> {
        let mut sessions: Vec<_> = self.inner.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions.iter().map(|s| s.info()).collect()
    }

    /// Number of open sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// True when no session is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session
    pub async fn shutdown(&self) {
        let ids: Vec<TerminalId> = self.list().into_iter().map(|info| info.id).collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}

impl Inner {
    fn get(&self, id: &TerminalId) -> Option<Arc<TerminalSession>> {
        self.sessions.lock().get(id).cloned()
    }

    fn open(this: &Arc<Self>, cwd: Option<PathBuf>) -> Result<TerminalId> {
        let cwd = cwd.unwrap_or_else(home_dir);
        if !cwd.is_dir() {
            return Err(BridgeError::spawn(format!(
                "working directory does not exist: {}",
                cwd.display()
            )));
        }

        let seq = this.next_seq.fetch_add(1, Ordering::SeqCst);
        let id = TerminalId::from_sequence(seq);
        let opts = &this.options;

        let (process, streams) = PtyProcess::spawn(&PtySpawn {
            program: &opts.shell,
            args: &opts.shell_args,
            cwd: &cwd,
            cols: opts.cols,
            rows: opts.rows,
        })?;
        let log = LogSink::create(&opts.log_dir, &id)?;

        let session = Arc::new(TerminalSession {
            id: id.clone(),
            seq,
            log_path: log.path().to_path_buf(),
            output: Mutex::new(SessionOutput::new(OutputBuffer::new(opts.buffer_capacity), log)),
            process: Mutex::new(Some(process)),
            generation: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            title: Mutex::new(initial_title(&opts.shell, &cwd)),
            cwd: Mutex::new(cwd),
            size: Mutex::new((opts.cols.max(1), opts.rows.max(1))),
            spawned_at: Mutex::new(Instant::now()),
            quick_exits: AtomicU32::new(0),
        });

        // Registered before the reader starts so no output races a missing entry
        this.sessions.lock().insert(id.clone(), Arc::clone(&session));

        if let Err(e) = start_io(Arc::downgrade(this), &session, streams, 0) {
            this.sessions.lock().remove(&id);
            session.shutdown();
            return Err(BridgeError::spawn(format!("failed to start terminal threads: {e}")));
        }

        log::info!("Opened terminal {} in {}", id, session.cwd.lock().display());
        Ok(id)
    }

    /// Called by the waiter thread once the shell has been reaped
    fn handle_exit(
        this: &Arc<Self>,
        session: &Arc<TerminalSession>,
        generation: u64,
        code: Option<u32>,
    ) {
        let sole = {
            let sessions = this.sessions.lock();
            let registered = sessions
                .get(&session.id)
                .is_some_and(|s| Arc::ptr_eq(s, session));
            if !registered {
                return;
            }
            sessions.len() == 1
        };
        let next = generation + 1;
        if session
            .generation
            .compare_exchange(generation, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        log::info!("Terminal {} exited with {:?}", session.id, code);
        session.alive.store(false, Ordering::SeqCst);
        // Releases the master and input side of the dead shell
        drop(session.process.lock().take());
        this.events.emit(BridgeEvent::TerminalExit {
            id: session.id.clone(),
            code,
        });

        if sole {
            Self::respawn(this, session, next);
        }
    }

    fn respawn(this: &Arc<Self>, session: &Arc<TerminalSession>, generation: u64) {
        let lived = session.spawned_at.lock().elapsed();
        let quick = if lived < QUICK_EXIT {
            session.quick_exits.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            session.quick_exits.store(0, Ordering::SeqCst);
            0
        };
        if quick > MAX_QUICK_RESPAWNS {
            log::error!(
                "Terminal {} keeps exiting immediately; not respawning",
                session.id
            );
            return;
        }

        let cwd = session.cwd.lock().clone();
        let cwd = if cwd.is_dir() { cwd } else { home_dir() };
        let (cols, rows) = *session.size.lock();
        let spawned = PtyProcess::spawn(&PtySpawn {
            program: &this.options.shell,
            args: &this.options.shell_args,
            cwd: &cwd,
            cols,
            rows,
        });
        let (process, streams) = match spawned {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("Failed to respawn terminal {}: {}", session.id, e);
                return;
            }
        };

        {
            let mut slot = session.process.lock();
            // Closed while the new shell was starting
            if session.generation() != generation {
                drop(slot);
                let mut process = process;
                process.kill();
                let _ = streams.child.wait();
                return;
            }
            *slot = Some(process);
        }
        *session.spawned_at.lock() = Instant::now();
        session.alive.store(true, Ordering::SeqCst);

        if let Err(e) = start_io(Arc::downgrade(this), session, streams, generation) {
            log::error!("Failed to restart threads for terminal {}: {}", session.id, e);
            session.alive.store(false, Ordering::SeqCst);
            drop(session.process.lock().take());
            return;
        }

        log::info!("Respawned terminal {} in {}", session.id, cwd.display());
        this.events.emit(BridgeEvent::TerminalRestarted {
            id: session.id.clone(),
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown();
        }
    }
}

// ============================================================================
// Reader thread
// ============================================================================

/// Start the reader and waiter threads serving one shell process
fn start_io(
    inner: Weak<Inner>,
    session: &Arc<TerminalSession>,
    streams: PtyStreams,
    generation: u64,
) -> std::io::Result<()> {
    let PtyStreams { output, child } = streams;
    let pid = session.process.lock().as_ref().and_then(PtyProcess::pid);
    let (drained_tx, drained) = mpsc::channel::<()>();

    start_reader(inner.clone(), Arc::clone(session), output, generation, drained_tx)?;

    let session = Arc::clone(session);
    thread::Builder::new()
        .name(format!("pty-waiter-{}", session.id))
        .spawn(move || wait_for_exit(&inner, &session, child, pid, &drained, generation))
        .map(|_| ())
}

/// Reap the shell, let the reader drain, then report the exit
///
/// Exit is taken from the process itself, not from output EOF: background
/// jobs can keep the slave open long after the shell is gone.
fn wait_for_exit(
    inner: &Weak<Inner>,
    session: &Arc<TerminalSession>,
    child: PtyChild,
    pid: Option<u32>,
    drained: &mpsc::Receiver<()>,
    generation: u64,
) {
    let code = child.wait();
    if session.generation() != generation {
        return;
    }
    if let Err(RecvTimeoutError::Timeout) = drained.recv_timeout(DRAIN_GRACE) {
        log::debug!("terminal {} output still open after exit; hanging up", session.id);
        pty::hang_up(pid);
    }
    if let Some(manager) = inner.upgrade() {
        Inner::handle_exit(&manager, session, generation, code);
    }
}

fn start_reader(
    inner: Weak<Inner>,
    session: Arc<TerminalSession>,
    mut reader: Box<dyn Read + Send>,
    generation: u64,
    drained: mpsc::Sender<()>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-reader-{}", session.id))
        .spawn(move || {
            // Dropped on return, which is what the waiter listens for
            let _drained = drained;
            let mut buf = [0u8; 4096];
            let mut carry = Utf8Carry::default();
            let mut titles = TitleScanner::new();

            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // Linux reports EIO once the slave side is gone
                    Err(e) => {
                        log::debug!("terminal {} reader stopped: {}", session.id, e);
                        break;
                    }
                };
                if session.generation() != generation {
                    return;
                }
                let chunk = &buf[..n];
                session.output.lock().record(chunk);

                let Some(manager) = inner.upgrade() else {
                    return;
                };
                let data = carry.push(chunk);
                if !data.is_empty() {
                    manager.events.emit(BridgeEvent::TerminalData {
                        id: session.id.clone(),
                        data,
                    });
                }
                if let Some(title) = titles.feed(chunk) {
                    *session.title.lock() = title.clone();
                    manager.events.emit(BridgeEvent::TerminalTitle {
                        id: session.id.clone(),
                        title,
                    });
                }
            }
        })
        .map(|_| ())
}

/// Holds back a trailing partial UTF-8 sequence until the next chunk
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);
        let cut = incomplete_tail_start(&data);
        self.pending = data.split_off(cut);
        data
    }
}

/// Index where an unfinished multi-byte sequence begins, or `data.len()`
fn incomplete_tail_start(data: &[u8]) -> usize {
    let len = data.len();
    for back in 1..=len.min(3) {
        let byte = data[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}

fn initial_title(shell: &Path, cwd: &Path) -> String {
    let shell = shell
        .file_name()
        .map_or_else(|| shell.display().to_string(), |n| n.to_string_lossy().into_owned());
    let dir = cwd
        .file_name()
        .map_or_else(|| cwd.display().to_string(), |n| n.to_string_lossy().into_owned());
    format!("{shell} - {dir}")
}
