//! # Termbridge Daemon Library
//!
//! This crate provides the daemon (server) functionality for Termbridge,
//! a real-time console bridge between client connections and per-project
//! backing processes.
//!
//! ## Overview
//!
//! Clients hold a persistent WebSocket connection, select a project, and
//! interact with its process through a small console vocabulary. The
//! daemon provides:
//!
//! - **Session Management**: one session per connection, owning at most
//!   one child process, torn down cleanly on disconnect or shutdown
//! - **Process Relay**: stdout/stderr streamed back as notifications,
//!   stdin fed from forwarded input, exit reported exactly once
//! - **Command Routing**: the built-in console vocabulary (help, run,
//!   status, stop, projects, info) with raw forwarding for everything
//!   else
//! - **Project Registry**: built-in project catalog, extensible through
//!   the configuration file
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Transport (axum)                     │
//! │      /ws upgrade per client   ·   /health   ·   /projects   │
//! └───────────────┬─────────────────────────────▲───────────────┘
//!                 │ events                      │ notifications
//! ┌───────────────▼─────────────────────────────┴───────────────┐
//! │                     Session Manager (one task)              │
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │   │   Sessions   │  │   Command    │  │     Project      │  │
//! │   │   (by id)    │  │    Router    │  │     Registry     │  │
//! │   └──────┬───────┘  └──────────────┘  └──────────────────┘  │
//! └──────────┼──────────────────────────────────────────────────┘
//!            │ spawn / write / terminate        ▲ process events
//! ┌──────────▼──────────────────────────────────┴───────────────┐
//! │               Process Handles (one per session)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::{AppState, Config, ProjectRegistry, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_or_default(None)?;
//!     config.validate()?;
//!
//!     let registry = Arc::new(ProjectRegistry::from_config(&config.projects));
//!     let (manager, handle) = SessionManager::new(Arc::clone(&registry), config.session.max_sessions);
//!     tokio::spawn(manager.run());
//!
//!     let state = AppState {
//!         manager: handle,
//!         registry,
//!         output_buffer: config.session.output_buffer,
//!     };
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
//!     axum::serve(listener, daemon::server::app(state)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`registry`]: Project catalog and process spawning
//! - [`router`]: Console command interpretation
//! - [`server`]: WebSocket transport and health endpoints
//! - [`session`]: Session and process lifecycle management

pub mod config;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError, ProjectConfig};

// Re-export registry types for convenience
pub use registry::{ProjectDescriptor, ProjectEntry, ProjectRegistry, SpawnError, DEFAULT_PROJECT};

// Re-export router types for convenience
pub use router::{route, Command, Directive, ProcessView, Routed, RouterContext};

// Re-export server types for convenience
pub use server::{app, AppState};

// Re-export session types for convenience
pub use session::{
    ConnectError, ConnectionId, ManagerEvent, ManagerHandle, ProcessError, ProcessEvent,
    ProcessHandle, SessionManager,
};
