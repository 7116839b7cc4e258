//! End-to-end integration tests for Termbridge.
//!
//! These tests verify complete flows work correctly:
//! - Configuration-driven registry construction
//! - The full console flow: connect, init, run, forward, stop, disconnect
//! - Session isolation
//! - Daemon shutdown

use std::sync::Arc;
use std::time::Duration;

use daemon::config::{Config, ProjectConfig};
use daemon::registry::ProjectRegistry;
use daemon::session::{ConnectError, ConnectionId, ManagerHandle, SessionManager};
use protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// A config whose project table carries an interactive stand-in.
fn test_config() -> Config {
    let mut config = Config::default();
    config.session.max_sessions = 4;
    config.projects.push(ProjectConfig {
        id: "echo-loop".to_string(),
        description: "echoes every input line".to_string(),
        tech: vec!["sh".to_string()],
        repository: "https://example.com/echo-loop".to_string(),
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            "echo ready; while read line; do echo \"echo:$line\"; done".to_string(),
        ],
    });
    config
}

fn start_daemon(config: &Config) -> ManagerHandle {
    let registry = Arc::new(ProjectRegistry::from_config(&config.projects));
    let (manager, handle) = SessionManager::new(registry, config.session.max_sessions);
    tokio::spawn(manager.run());
    handle
}

async fn connect(handle: &ManagerHandle) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(256);
    let id = handle.connect(tx).await.expect("connection refused");
    (id, rx)
}

async fn send_input(handle: &ManagerHandle, id: &ConnectionId, content: &str) {
    let payload = serde_json::to_string(&ClientMessage::Input {
        content: content.to_string(),
        project: None,
    })
    .unwrap();
    handle.inbound(id.clone(), payload).await;
}

async fn send_init(handle: &ManagerHandle, id: &ConnectionId, project: &str) {
    let payload = serde_json::to_string(&ClientMessage::Init {
        project: project.to_string(),
    })
    .unwrap();
    handle.inbound(id.clone(), payload).await;
}

async fn recv_until(
    rx: &mut mpsc::Receiver<ServerMessage>,
    mut pred: impl FnMut(&ServerMessage) -> bool,
) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    loop {
        let message = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("outbound channel closed");
        let done = pred(&message);
        seen.push(message);
        if done {
            return seen;
        }
    }
}

// =============================================================================
// Configuration and Registry
// =============================================================================

#[test]
fn test_config_registry_round_trip() {
    let config = test_config();
    assert_eq!(config.validate(), Ok(()));

    let registry = ProjectRegistry::from_config(&config.projects);
    assert!(registry.contains("echo-loop"));
    assert!(registry.contains("cpu-scheduler"));
    assert_eq!(
        registry.descriptor("echo-loop").description,
        "echoes every input line"
    );
}

// =============================================================================
// Full Console Flow
// =============================================================================

#[tokio::test]
async fn test_full_console_flow() {
    let config = test_config();
    let handle = start_daemon(&config);

    let (id, mut rx) = connect(&handle).await;

    // Welcome arrives first.
    let seen = recv_until(&mut rx, |m| m.kind() == "system").await;
    assert!(seen.last().unwrap().content().contains("Welcome"));

    // Select the project and start it.
    send_init(&handle, &id, "echo-loop").await;
    send_input(&handle, &id, "run").await;
    recv_until(&mut rx, |m| m.content().contains("ready")).await;

    // Unrecognized input is forwarded to the process verbatim.
    send_input(&handle, &id, "marco").await;
    recv_until(&mut rx, |m| m.content().contains("echo:marco")).await;

    // Built-ins are still interpreted while the process runs.
    send_input(&handle, &id, "status").await;
    let seen = recv_until(&mut rx, |m| m.content().contains("Process:")).await;
    assert!(seen.last().unwrap().content().contains("running"));

    // Stop tears the process down asynchronously.
    send_input(&handle, &id, "stop").await;
    recv_until(&mut rx, |m| m.content().contains("terminated by signal")).await;

    // A new run succeeds after the exit event.
    send_input(&handle, &id, "run").await;
    recv_until(&mut rx, |m| m.content().contains("Starting echo-loop")).await;

    handle.disconnect(id).await;
    assert_eq!(handle.session_count().await, 0);
}

// =============================================================================
// Session Isolation
// =============================================================================

#[tokio::test]
async fn test_sessions_never_observe_each_other() {
    let config = test_config();
    let handle = start_daemon(&config);

    let (id_a, mut rx_a) = connect(&handle).await;
    let (id_b, mut rx_b) = connect(&handle).await;

    // Session A runs a process and exchanges output.
    send_init(&handle, &id_a, "echo-loop").await;
    send_input(&handle, &id_a, "run").await;
    recv_until(&mut rx_a, |m| m.content().contains("ready")).await;
    send_input(&handle, &id_a, "for-a-only").await;
    recv_until(&mut rx_a, |m| m.content().contains("echo:for-a-only")).await;

    // Session B only ever sees its own traffic.
    send_input(&handle, &id_b, "help").await;
    let seen_b = recv_until(&mut rx_b, |m| m.content().contains("Available commands")).await;
    for message in &seen_b {
        assert!(
            !message.content().contains("echo:"),
            "session B observed session A's process output"
        );
        assert!(!message.content().contains("Starting"));
    }

    // A malformed payload on B leaves A untouched.
    handle.inbound(id_b.clone(), "garbage".to_string()).await;
    recv_until(&mut rx_b, |m| m.kind() == "error").await;
    send_input(&handle, &id_a, "polo").await;
    let seen_a = recv_until(&mut rx_a, |m| m.content().contains("echo:polo")).await;
    assert!(!seen_a.iter().any(|m| m.kind() == "error"));

    handle.disconnect(id_a).await;
    handle.disconnect(id_b).await;
}

// =============================================================================
// Limits and Shutdown
// =============================================================================

#[tokio::test]
async fn test_session_limit_from_config() {
    let mut config = test_config();
    config.session.max_sessions = 2;
    let handle = start_daemon(&config);

    let (_a, _rx_a) = connect(&handle).await;
    let (_b, _rx_b) = connect(&handle).await;

    let (tx, mut rx_c) = mpsc::channel(16);
    let refused = handle.connect(tx).await;
    assert_eq!(refused, Err(ConnectError::LimitReached(2)));

    let notice = timeout(WAIT, rx_c.recv()).await.unwrap().unwrap();
    assert_eq!(notice.kind(), "error");
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let config = test_config();
    let handle = start_daemon(&config);

    let (id, mut rx) = connect(&handle).await;
    send_init(&handle, &id, "echo-loop").await;
    send_input(&handle, &id, "run").await;
    recv_until(&mut rx, |m| m.content().contains("ready")).await;

    handle.shutdown().await;

    // The manager drops all sessions; the outbound channel closes after
    // any in-flight notifications.
    loop {
        match timeout(WAIT, rx.recv()).await.expect("channel never closed") {
            Some(_) => continue,
            None => break,
        }
    }
    assert_eq!(handle.session_count().await, 0);
}
