//! Termbridge Daemon
//!
//! Console bridge relaying client sessions to project processes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use daemon::config::Config;
use daemon::registry::ProjectRegistry;
use daemon::server::{self, AppState};
use daemon::session::SessionManager;

/// Termbridge daemon - console bridge between clients and project processes.
#[derive(Parser, Debug)]
#[command(name = "termbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Termbridge daemon starting...");

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
        Config::load(config_path)?
    } else {
        Config::load_or_default(None)?
    };

    // Validate configuration
    config.validate()?;

    let bind_addr = match cli.listen {
        Some(addr) => addr,
        None => config.bind_addr()?,
    };

    let registry = Arc::new(ProjectRegistry::from_config(&config.projects));
    tracing::info!(projects = registry.catalog().count(), "Project registry ready");

    let (manager, handle) =
        SessionManager::new(Arc::clone(&registry), config.session.max_sessions);
    let manager_task = tokio::spawn(manager.run());

    let state = AppState {
        manager: handle.clone(),
        registry,
        output_buffer: config.session.output_buffer,
    };

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "Listening for console connections");

    axum::serve(listener, server::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Terminate every child process before exiting.
    handle.shutdown().await;
    let _ = manager_task.await;

    tracing::info!("Termbridge daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
