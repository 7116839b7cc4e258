//! Child process handling for project sessions.
//!
//! This module spawns one backing process per `run` and exposes it as a
//! bounded-lifetime event producer: a stream of output chunks terminated
//! by exactly one exit (or failure) event. Input is queued to the child's
//! stdin; termination is requested with a signal and confirmed
//! asynchronously through the exit event.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Buffer size for reading from the child's output streams.
const READ_BUFFER_SIZE: usize = 4096;

/// Channel capacity for queued stdin writes.
const STDIN_QUEUE_CAPACITY: usize = 256;

/// Channel capacity for process events.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Grace period between the termination signal and a forced kill.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Errors that can occur while starting or driving a process.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The OS refused to start the child.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// The child started without one of its standard streams.
    #[error("process started without a {0} pipe")]
    MissingPipe(&'static str),
}

/// Events produced by a spawned process.
///
/// A process emits any number of `Output` events followed by exactly one
/// terminal event (`Exited` or `Failed`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of stdout or stderr, decoded as text.
    Output(String),

    /// The process terminated.
    Exited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Signal number, if the process was killed by a signal.
        signal: Option<i32>,
    },

    /// Reading from the process failed after it had started.
    Failed(String),
}

/// Handle to one spawned child process.
///
/// The handle owns the process for its lifetime: input goes through
/// [`write`](Self::write), output and exit arrive on the event receiver
/// returned by [`spawn`](Self::spawn). Dropping the handle requests
/// termination, as does [`terminate`](Self::terminate).
pub struct ProcessHandle {
    /// Process ID of the child.
    pid: Option<u32>,

    /// Queue feeding the child's stdin.
    stdin_tx: mpsc::Sender<String>,

    /// One-shot termination trigger, consumed on first use.
    kill_tx: Option<oneshot::Sender<()>>,

    /// Cleared by the watcher task once the child has exited.
    running: Arc<AtomicBool>,

    /// When the child was spawned.
    started_at: Instant,
}

impl ProcessHandle {
    /// Spawns a child process with piped standard streams.
    ///
    /// Returns the handle and a receiver for the process's event stream.
    /// The receiver yields output chunks in the order each stream
    /// produced them and closes after the terminal event.
    pub fn spawn(
        program: &str,
        args: &[String],
    ) -> Result<(Self, mpsc::Receiver<ProcessEvent>), ProcessError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe("stderr"))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_QUEUE_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));

        tokio::spawn(pump_stdin(stdin, stdin_rx, pid));

        let stdout_task = tokio::spawn(pump_output(stdout, event_tx.clone()));
        let stderr_task = tokio::spawn(pump_output(stderr, event_tx.clone()));

        tokio::spawn(watch_exit(
            child,
            kill_rx,
            stdout_task,
            stderr_task,
            event_tx,
            Arc::clone(&running),
            pid,
        ));

        Ok((
            Self {
                pid,
                stdin_tx,
                kill_tx: Some(kill_tx),
                running,
                started_at: Instant::now(),
            },
            event_rx,
        ))
    }

    /// Returns the child's process ID, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns whether the child is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns how long the process has been alive.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Queues text for the child's stdin.
    ///
    /// Writing to a process that has already exited is a benign no-op:
    /// the text is dropped and logged, never surfaced as a failure.
    pub fn write(&self, text: impl Into<String>) {
        match self.stdin_tx.try_send(text.into()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(pid = ?self.pid, "Dropping write to exited process");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(pid = ?self.pid, "Stdin queue full, dropping input");
            }
        }
    }

    /// Requests termination without waiting for the child to exit.
    ///
    /// The exit event on the process's event stream confirms the actual
    /// teardown. Calling this more than once is a no-op.
    pub fn terminate(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            tracing::debug!(pid = ?self.pid, "Requesting process termination");
            let _ = kill_tx.send(());
        }
    }
}

/// Drains the stdin queue into the child's input stream.
async fn pump_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>, pid: Option<u32>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = stdin.write_all(text.as_bytes()).await {
            tracing::debug!(pid = ?pid, error = %e, "Stdin write failed, stopping writer");
            break;
        }
        if let Err(e) = stdin.flush().await {
            tracing::debug!(pid = ?pid, error = %e, "Stdin flush failed, stopping writer");
            break;
        }
    }
}

/// Reads one output stream to EOF, forwarding chunks as events.
///
/// Returns a description of the read error, if one occurred.
async fn pump_output<R>(mut reader: R, tx: mpsc::Sender<ProcessEvent>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => return None,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buffer[..n]).into_owned();
                if tx.send(ProcessEvent::Output(text)).await.is_err() {
                    // Consumer is gone; nothing left to relay to.
                    return None;
                }
            }
            Err(e) => return Some(e.to_string()),
        }
    }
}

/// Waits for the child to exit, honoring termination requests, and emits
/// the single terminal event after both output pumps have drained.
async fn watch_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    stdout_task: JoinHandle<Option<String>>,
    stderr_task: JoinHandle<Option<String>>,
    event_tx: mpsc::Sender<ProcessEvent>,
    running: Arc<AtomicBool>,
    pid: Option<u32>,
) {
    // Fires on terminate() and on handle drop alike.
    let natural_exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };

    let status = match natural_exit {
        Some(status) => status,
        None => {
            signal_terminate(pid, &mut child);
            match tokio::time::timeout(TERM_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(pid = ?pid, "Process ignored termination signal, killing");
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        }
    };

    // Both pumps reach EOF once the child's pipes close; join them so the
    // terminal event is the last thing on the stream.
    let stdout_err = stdout_task.await.ok().flatten();
    let stderr_err = stderr_task.await.ok().flatten();

    running.store(false, Ordering::SeqCst);

    let event = match status {
        Ok(status) => {
            if let Some(error) = stdout_err.or(stderr_err) {
                ProcessEvent::Failed(error)
            } else {
                ProcessEvent::Exited {
                    code: status.code(),
                    signal: exit_signal(&status),
                }
            }
        }
        Err(e) => ProcessEvent::Failed(e.to_string()),
    };

    tracing::debug!(pid = ?pid, event = ?event, "Process terminated");

    let _ = event_tx.send(event).await;
}

/// Sends SIGTERM to the child, falling back to a hard kill when the
/// signal cannot be delivered.
fn signal_terminate(pid: Option<u32>, child: &mut Child) {
    let delivered = pid.is_some_and(|pid| {
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
    });
    if !delivered {
        if let Err(e) = child.start_kill() {
            tracing::debug!(pid = ?pid, error = %e, "Kill request failed");
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
