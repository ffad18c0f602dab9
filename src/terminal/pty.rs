//! PTY-backed child process

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};

use crate::error::{BridgeError, Result};

/// Grace period between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_millis(100);

/// What to launch inside a new PTY
#[derive(Debug, Clone)]
pub struct PtySpawn<'a> {
    /// Executable
    pub program: &'a Path,
    /// Arguments
    pub args: &'a [String],
    /// Working directory
    pub cwd: &'a Path,
    /// Columns
    pub cols: u16,
    /// Rows
    pub rows: u16,
}

/// Exit code of a child, published once by whoever reaps it
#[derive(Debug, Default)]
struct ExitCell {
    code: Mutex<Option<Option<u32>>>,
    reaped: Condvar,
}

impl ExitCell {
    fn record(&self, code: Option<u32>) {
        *self.code.lock() = Some(code);
        self.reaped.notify_all();
    }

    fn has_exited(&self) -> bool {
        self.code.lock().is_some()
    }

    /// Wait up to `timeout` for the child to be reaped
    fn wait_for(&self, timeout: Duration) -> bool {
        let mut code = self.code.lock();
        let _ = self
            .reaped
            .wait_while_for(&mut code, |code| code.is_none(), timeout);
        code.is_some()
    }
}

/// The parts of a new PTY that move onto dedicated threads
pub struct PtyStreams {
    /// Master-side output
    pub output: Box<dyn Read + Send>,
    /// Child handle, reaped by [`PtyChild::wait`]
    pub child: PtyChild,
}

/// Owned child handle; waiting consumes it
pub struct PtyChild {
    child: Box<dyn Child + Send + Sync>,
    exit: Arc<ExitCell>,
}

impl PtyChild {
    /// Block until the child exits and return its exit code
    pub fn wait(mut self) -> Option<u32> {
        let code = match self.child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                log::warn!("Failed to reap PTY child {:?}: {}", self.child.process_id(), e);
                None
            }
        };
        self.exit.record(code);
        code
    }
}

/// A process attached to the slave side of a pseudo-terminal
///
/// Holds the master side, the input queue and a kill handle. Output and the
/// child itself are handed back in [`PtyStreams`] so a reader thread and a
/// waiter thread can own them. Input is drained by a writer thread, so
/// [`write`](Self::write) never blocks on a shell that is not reading.
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    input: Sender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exit: Arc<ExitCell>,
    pid: Option<u32>,
    program: PathBuf,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("exited", &self.exit.has_exited())
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Open a PTY and start `params.program` in it
    ///
    /// # Errors
    /// Returns `Spawn` with the OS error text if the PTY cannot be opened,
    /// the program cannot be started or the input thread cannot be created
    pub fn spawn(params: &PtySpawn<'_>) -> Result<(Self, PtyStreams)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(params.cols, params.rows))
            .map_err(|e| BridgeError::spawn(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(params.program);
        cmd.args(params.args);
        cmd.cwd(params.cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            BridgeError::spawn(format!("{}: {e}", params.program.display()))
        })?;
        // Only the child may hold the slave, or EOF never arrives
        drop(pair.slave);

        let pid = child.process_id();
        let mut killer = child.clone_killer();
        let handles = pair
            .master
            .try_clone_reader()
            .and_then(|output| Ok((output, pair.master.take_writer()?)))
            .map_err(|e| BridgeError::spawn(format!("PTY streams unavailable: {e}")))
            .and_then(|(output, writer)| Ok((output, spawn_writer(writer, pid)?)));
        let (output, input) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = killer.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        log::debug!("Spawned {} in PTY (pid {:?})", params.program.display(), pid);
        let exit = Arc::new(ExitCell::default());
        Ok((
            Self {
                master: pair.master,
                input,
                killer,
                exit: Arc::clone(&exit),
                pid,
                program: params.program.to_path_buf(),
            },
            PtyStreams {
                output,
                child: PtyChild { child, exit },
            },
        ))
    }

    /// OS process id of the child
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program running in the PTY
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Queue bytes for the child's input
    ///
    /// # Errors
    /// Returns `ProcessExited` once the input side has shut down
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|_| BridgeError::process_exited("PTY input closed"))
    }

    /// Change the PTY window size; both dimensions are clamped to at least 1
    ///
    /// # Errors
    /// Returns error if the ioctl fails
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(pty_size(cols, rows))
            .map_err(|e| BridgeError::Io(std::io::Error::other(e.to_string())))
    }

    /// Terminate the child and every process left in its session
    ///
    /// Idempotent and a no-op once the child has been reaped. Reaping itself
    /// is left to whoever owns the [`PtyChild`].
    pub fn kill(&mut self) {
        if self.exit.has_exited() {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            signal_session(pid, libc::SIGTERM);
            if !self.exit.wait_for(TERM_GRACE) {
                signal_session(pid, libc::SIGKILL);
            }
            return;
        }

        if let Err(e) = self.killer.kill() {
            log::error!("Failed to kill PTY child {:?}: {}", self.pid, e);
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Drain queued input into the PTY on a dedicated thread
fn spawn_writer(mut writer: Box<dyn Write + Send>, pid: Option<u32>) -> Result<Sender<Vec<u8>>> {
    let (input, queue) = mpsc::channel::<Vec<u8>>();
    thread::Builder::new()
        .name(format!("pty-writer-{}", pid.unwrap_or_default()))
        .spawn(move || {
            for data in queue {
                if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                    log::debug!("PTY input for pid {pid:?} closed: {e}");
                    break;
                }
            }
        })
        .map_err(|e| BridgeError::spawn(format!("PTY writer thread: {e}")))?;
    Ok(input)
}

/// Hang up whatever is still attached to the session led by `pid`
///
/// Used after the shell itself has exited, when background jobs may still
/// hold the slave open.
pub fn hang_up(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_session(pid, libc::SIGHUP);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Send `signal` to the process group led by `pid` and, on Linux, to every
/// other process in its session
///
/// The shell is a session leader, so jobs it moved into their own process
/// groups still share its session id.
#[cfg(unix)]
fn signal_session(pid: u32, signal: libc::c_int) {
    let Ok(sid) = libc::pid_t::try_from(pid) else {
        log::error!("PTY child pid {pid} does not fit in pid_t; cannot signal");
        return;
    };
    send_signal(-sid, signal);
    #[cfg(target_os = "linux")]
    for member in session_members(sid) {
        send_signal(member, signal);
    }
}

#[cfg(unix)]
fn send_signal(target: libc::pid_t, signal: libc::c_int) {
    // SAFETY: kill(2) only sends a signal; no memory is touched.
    let rc = unsafe { libc::kill(target, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::error!("Failed to send signal {signal} to {target}: {err}");
        }
    }
}

/// Processes whose session id is `sid`, the leader excluded
#[cfg(target_os = "linux")]
fn session_members(sid: libc::pid_t) -> Vec<libc::pid_t> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<libc::pid_t>().ok())
        .filter(|&pid| pid != sid)
        // SAFETY: getsid(2) only reads kernel state for the given pid.
        .filter(|&pid| unsafe { libc::getsid(pid) } == sid)
        .collect()
}
