//! HTTP/WebSocket transport for the daemon.
//!
//! Thin wrapper around the session manager: one task per socket relays
//! frames in both directions and fires the manager's connect/disconnect
//! events. The read-only `/health` and `/projects` endpoints live here
//! too.

use std::sync::Arc;

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use protocol::ServerMessage;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::registry::{ProjectDescriptor, ProjectRegistry};
use crate::session::ManagerHandle;

/// Shared state for the transport handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle into the session manager loop.
    pub manager: ManagerHandle,
    /// The project registry, for the metadata endpoint.
    pub registry: Arc<ProjectRegistry>,
    /// Outbound notification buffer per connection.
    pub output_buffer: usize,
}

/// Builds the axum router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/projects", get(projects))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.manager.session_count().await,
    })
}

async fn projects(State(state): State<AppState>) -> Json<Vec<ProjectDescriptor>> {
    Json(state.registry.catalog().cloned().collect())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridges one WebSocket to the session manager.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.output_buffer);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let id = match state.manager.connect(outbound_tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!(error = %e, "Connection refused");
            // Relay the refusal notification the manager queued, then
            // close the socket.
            while let Ok(message) = outbound_rx.try_recv() {
                let _ = ws_tx.send(frame(&message)).await;
            }
            let _ = ws_tx.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            notification = outbound_rx.recv() => match notification {
                Some(message) => {
                    if ws_tx.send(frame(&message)).await.is_err() {
                        break;
                    }
                }
                // The manager dropped the session (shutdown).
                None => break,
            },

            inbound = ws_rx.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    state.manager.inbound(id.clone(), text.to_string()).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                // Binary frames and ping/pong are not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    state.manager.transport_error(id.clone(), e.to_string()).await;
                    break;
                }
            },
        }
    }

    let _ = ws_tx.close().await;
    state.manager.disconnect(id).await;
}

fn frame(message: &ServerMessage) -> WsMessage {
    WsMessage::Text(message.to_json().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;

    fn test_state() -> AppState {
        let registry = Arc::new(ProjectRegistry::builtin());
        let (manager, handle) = SessionManager::new(Arc::clone(&registry), 8);
        tokio::spawn(manager.run());
        AppState {
            manager: handle,
            registry,
            output_buffer: 64,
        }
    }

    #[tokio::test]
    async fn test_health_reports_session_count() {
        let state = test_state();

        let Json(response) = health(State(state.clone())).await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.active_sessions, 0);

        let (tx, _rx) = mpsc::channel(16);
        let _id = state.manager.connect(tx).await.unwrap();

        let Json(response) = health(State(state)).await;
        assert_eq!(response.active_sessions, 1);
    }

    #[tokio::test]
    async fn test_projects_lists_registry_catalog() {
        let state = test_state();

        let Json(descriptors) = projects(State(state.clone())).await;
        let expected: Vec<_> = state.registry.catalog().cloned().collect();
        assert_eq!(descriptors, expected);
        assert!(descriptors.iter().any(|d| d.id == "cpu-scheduler"));
    }
}
