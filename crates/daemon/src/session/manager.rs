//! Session management: the event loop that owns all live sessions.
//!
//! One `SessionManager` task owns the whole connection-to-session map.
//! Transport tasks and process pumps never touch that state directly;
//! they enqueue [`ManagerEvent`]s through a [`ManagerHandle`] and the
//! loop applies them one at a time. That single-writer discipline is
//! what guarantees per-session FIFO ordering and lock-free teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use protocol::{ClientMessage, ServerMessage};
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::registry::{ProjectRegistry, SpawnError};
use crate::router::{self, Command, Directive, ProcessView, RouterContext};
use crate::session::process::{ProcessEvent, ProcessHandle};

/// Unique identifier for a client connection.
pub type ConnectionId = String;

/// Capacity of the manager's event queue.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Project id used when a session never selected one.
const UNSELECTED_PROJECT: &str = "default";

static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Allocates a connection id that cannot collide for the lifetime of
/// this process: a monotonic counter plus a random suffix.
fn next_connection_id() -> ConnectionId {
    let seq = CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("conn-{seq}-{:08x}", rand::random::<u32>())
}

/// Errors surfaced when registering a connection.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConnectError {
    /// The configured session limit is reached.
    #[error("session limit reached ({0})")]
    LimitReached(usize),

    /// The manager is shutting down or gone.
    #[error("session manager unavailable")]
    Unavailable,
}

/// Events consumed by the session manager loop.
#[derive(Debug)]
pub enum ManagerEvent {
    /// A new client connection completed its handshake.
    Connect {
        /// Channel the session's notifications are delivered on.
        outbound: mpsc::Sender<ServerMessage>,
        /// Receives the allocated connection id, or the refusal.
        reply: oneshot::Sender<Result<ConnectionId, ConnectError>>,
    },

    /// A raw payload arrived from a client.
    Inbound {
        id: ConnectionId,
        payload: String,
    },

    /// A client connection went away.
    Disconnect {
        id: ConnectionId,
    },

    /// The transport reported a non-fatal error for a connection.
    TransportError {
        id: ConnectionId,
        error: String,
    },

    /// An event from a session's child process.
    Process {
        id: ConnectionId,
        event: ProcessEvent,
    },

    /// Reports the number of live sessions.
    SessionCount {
        reply: oneshot::Sender<usize>,
    },

    /// Terminate every child process and stop the loop.
    Shutdown,
}

/// Cloneable handle for enqueueing events to the session manager.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerEvent>,
}

impl ManagerHandle {
    /// Registers a connection, returning its id.
    ///
    /// The welcome notification is queued on `outbound` before this
    /// returns. A refusal (session limit) is also queued there so the
    /// transport can relay it before closing.
    pub async fn connect(
        &self,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<ConnectionId, ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerEvent::Connect { outbound, reply })
            .await
            .map_err(|_| ConnectError::Unavailable)?;
        rx.await.map_err(|_| ConnectError::Unavailable)?
    }

    /// Delivers a raw inbound payload for a connection.
    pub async fn inbound(&self, id: ConnectionId, payload: String) {
        let _ = self.tx.send(ManagerEvent::Inbound { id, payload }).await;
    }

    /// Reports a connection as gone.
    pub async fn disconnect(&self, id: ConnectionId) {
        let _ = self.tx.send(ManagerEvent::Disconnect { id }).await;
    }

    /// Reports a transport-level error for a connection.
    pub async fn transport_error(&self, id: ConnectionId, error: String) {
        let _ = self
            .tx
            .send(ManagerEvent::TransportError { id, error })
            .await;
    }

    /// Returns the number of live sessions (0 when the manager is gone).
    pub async fn session_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(ManagerEvent::SessionCount { reply })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Requests termination of all children and stops the manager.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ManagerEvent::Shutdown).await;
    }
}

/// State for one client connection.
struct Session {
    id: ConnectionId,
    /// Project selected via `init`, if any.
    project: Option<String>,
    /// The owned child process, if one exists. Cleared only by the
    /// process's exit or failure event, never synchronously.
    process: Option<ProcessHandle>,
    /// Channel the transport drains to the client.
    outbound: mpsc::Sender<ServerMessage>,
    connected_at: Instant,
}

impl Session {
    /// Queues a notification without blocking the manager loop. A full
    /// buffer drops the notification; a closed one means the client is
    /// already gone.
    fn send(&self, message: ServerMessage) {
        match self.outbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    kind = message.kind(),
                    "Outbound buffer full, dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.id, "Outbound channel closed");
            }
        }
    }
}

/// The session manager event loop.
///
/// Owns every live [`Session`], keyed by connection id. Constructed with
/// [`SessionManager::new`], then driven to completion with
/// [`SessionManager::run`].
pub struct SessionManager {
    sessions: HashMap<ConnectionId, Session>,
    registry: Arc<ProjectRegistry>,
    max_sessions: usize,
    events: mpsc::Receiver<ManagerEvent>,
    /// Cloned into process-event forwarder tasks.
    events_tx: mpsc::Sender<ManagerEvent>,
}

impl SessionManager {
    /// Creates a manager and its handle.
    pub fn new(registry: Arc<ProjectRegistry>, max_sessions: usize) -> (Self, ManagerHandle) {
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let handle = ManagerHandle {
            tx: events_tx.clone(),
        };
        (
            Self {
                sessions: HashMap::new(),
                registry,
                max_sessions,
                events,
                events_tx,
            },
            handle,
        )
    }

    /// Consumes events until shutdown.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        tracing::info!("Session manager stopped");
    }

    /// Applies one event. Returns `false` to stop the loop.
    fn handle_event(&mut self, event: ManagerEvent) -> bool {
        match event {
            ManagerEvent::Connect { outbound, reply } => {
                let _ = reply.send(self.handle_connect(outbound));
            }
            ManagerEvent::Inbound { id, payload } => self.handle_inbound(&id, &payload),
            ManagerEvent::Disconnect { id } => self.handle_disconnect(&id),
            ManagerEvent::TransportError { id, error } => {
                // The transport fires Disconnect itself if the error is
                // fatal; the session stays up.
                tracing::warn!(connection_id = %id, error = %error, "Transport error");
            }
            ManagerEvent::Process { id, event } => self.handle_process_event(&id, event),
            ManagerEvent::SessionCount { reply } => {
                let _ = reply.send(self.sessions.len());
            }
            ManagerEvent::Shutdown => {
                self.handle_shutdown();
                return false;
            }
        }
        true
    }

    fn handle_connect(
        &mut self,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<ConnectionId, ConnectError> {
        if self.sessions.len() >= self.max_sessions {
            tracing::warn!(
                limit = self.max_sessions,
                "Refusing connection: session limit reached"
            );
            let _ = outbound.try_send(ServerMessage::error(format!(
                "Session limit reached ({}). Try again later.",
                self.max_sessions
            )));
            return Err(ConnectError::LimitReached(self.max_sessions));
        }

        let id = next_connection_id();
        let session = Session {
            id: id.clone(),
            project: None,
            process: None,
            outbound,
            connected_at: Instant::now(),
        };

        session.send(ServerMessage::system(
            "Welcome to the Termbridge console. Send \"help\" to list commands.",
        ));

        tracing::info!(connection_id = %id, sessions = self.sessions.len() + 1, "Session connected");
        self.sessions.insert(id.clone(), session);

        Ok(id)
    }

    fn handle_inbound(&mut self, id: &ConnectionId, payload: &str) {
        // Snapshot loop-wide state before borrowing the session.
        let connections = self.sessions.len();
        let registry = Arc::clone(&self.registry);

        let Some(session) = self.sessions.get_mut(id) else {
            tracing::debug!(connection_id = %id, "Inbound for unknown session");
            return;
        };

        let message = match ClientMessage::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Malformed inbound payload");
                session.send(ServerMessage::error("Invalid message format"));
                return;
            }
        };

        match message {
            ClientMessage::Init { project } => {
                tracing::debug!(connection_id = %id, project = %project, "Project selected");
                session.send(ServerMessage::system(format!("Project set to {project}")));
                session.project = Some(project);
            }
            ClientMessage::Input { content, project } => {
                let input = content.trim().to_string();
                let effective = project
                    .as_deref()
                    .or(session.project.as_deref())
                    .unwrap_or(UNSELECTED_PROJECT)
                    .to_string();

                // Resident memory is only consulted by `status`; skip the
                // sample for everything else.
                let memory_bytes = match Command::parse(&input) {
                    Some(Command::Status) => current_memory_bytes(),
                    _ => 0,
                };

                let ctx = RouterContext {
                    project: &effective,
                    process: session.process.as_ref().map(process_view),
                    connections,
                    memory_bytes,
                    registry: &registry,
                };

                let routed = router::route(&input, &ctx);
                for reply in routed.replies {
                    session.send(reply);
                }

                match routed.directive {
                    Directive::None => {}
                    Directive::Spawn { project } => {
                        Self::spawn_for_session(&self.events_tx, session, &registry, &project);
                    }
                    Directive::Terminate => {
                        if let Some(process) = session.process.as_mut() {
                            process.terminate();
                        }
                    }
                    Directive::Forward(text) => {
                        if let Some(process) = session.process.as_ref() {
                            process.write(text);
                        }
                    }
                }
            }
        }
    }

    /// Spawns the project's process and wires its event stream back into
    /// the manager queue.
    fn spawn_for_session(
        events_tx: &mpsc::Sender<ManagerEvent>,
        session: &mut Session,
        registry: &ProjectRegistry,
        project: &str,
    ) {
        match registry.spawn(project) {
            Ok((handle, mut events)) => {
                tracing::info!(
                    connection_id = %session.id,
                    project = %project,
                    pid = ?handle.pid(),
                    "Process started"
                );
                session.process = Some(handle);

                let forward_tx = events_tx.clone();
                let id = session.id.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if forward_tx
                            .send(ManagerEvent::Process {
                                id: id.clone(),
                                event,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
            Err(e) => {
                tracing::error!(
                    connection_id = %session.id,
                    project = %project,
                    error = %e,
                    "Failed to start process"
                );
                let content = match e {
                    SpawnError::UnknownProject(project) => {
                        format!("Unknown project: {project}")
                    }
                    SpawnError::Process(e) => format!("Failed to start {project}: {e}"),
                };
                session.send(ServerMessage::error(content));
            }
        }
    }

    fn handle_disconnect(&mut self, id: &ConnectionId) {
        let Some(mut session) = self.sessions.remove(id) else {
            // Disconnecting an already-removed id is a no-op.
            return;
        };

        if let Some(mut process) = session.process.take() {
            process.terminate();
        }

        tracing::info!(
            connection_id = %id,
            duration_secs = session.connected_at.elapsed().as_secs(),
            sessions = self.sessions.len(),
            "Session disconnected"
        );
    }

    fn handle_process_event(&mut self, id: &ConnectionId, event: ProcessEvent) {
        let Some(session) = self.sessions.get_mut(id) else {
            // The session disconnected while the process was winding down.
            tracing::trace!(connection_id = %id, "Process event for removed session");
            return;
        };

        match event {
            ProcessEvent::Output(chunk) => {
                session.send(ServerMessage::output(chunk));
            }
            ProcessEvent::Exited { code, signal } => {
                let content = match (code, signal) {
                    (Some(code), _) => format!("Process exited with code {code}"),
                    (None, Some(signal)) => format!("Process terminated by signal {signal}"),
                    (None, None) => "Process exited".to_string(),
                };
                tracing::info!(connection_id = %id, code = ?code, signal = ?signal, "Process exited");
                session.send(ServerMessage::output(content));
                session.process = None;
            }
            ProcessEvent::Failed(error) => {
                tracing::error!(connection_id = %id, error = %error, "Process failed");
                session.send(ServerMessage::error(format!("Process error: {error}")));
                session.process = None;
            }
        }
    }

    fn handle_shutdown(&mut self) {
        tracing::info!(sessions = self.sessions.len(), "Shutting down all sessions");
        for (_, mut session) in self.sessions.drain() {
            if let Some(mut process) = session.process.take() {
                process.terminate();
            }
        }
    }
}

fn process_view(process: &ProcessHandle) -> ProcessView {
    ProcessView {
        running: process.is_running(),
        uptime: process.uptime(),
        pid: process.pid(),
    }
}

/// Resident memory of the daemon process, in bytes.
fn current_memory_bytes() -> u64 {
    let mut system = System::new();
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
    system.process(pid).map_or(0, sysinfo::Process::memory)
}
