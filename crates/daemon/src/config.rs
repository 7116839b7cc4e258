//! Configuration management for the Termbridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termbridge/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("output_buffer must be greater than 0")]
    InvalidOutputBuffer,

    #[error("bind_addr is not a valid socket address: {0}")]
    InvalidBindAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("project entry has an empty id")]
    EmptyProjectId,

    #[error("project {0} has an empty command")]
    EmptyProjectCommand(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Termbridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Session management configuration.
    pub session: SessionConfig,

    /// Project entries merged over the built-in registry.
    pub projects: Vec<ProjectConfig>,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the daemon listens on.
    pub bind_addr: String,
}

/// Session management configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Outbound notification buffer per connection. When a client cannot
    /// keep up, process output beyond this buffer is dropped.
    pub output_buffer: usize,
}

/// One project entry from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Project identifier.
    pub id: String,

    /// One-line description shown in the catalog.
    #[serde(default)]
    pub description: String,

    /// Technologies, in display order.
    #[serde(default)]
    pub tech: Vec<String>,

    /// Source repository URL.
    #[serde(default)]
    pub repository: String,

    /// Program backing the project.
    pub command: String,

    /// Arguments to the program.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            output_buffer: 256,
        }
    }
}

impl Config {
    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("termbridge")
            .join("config.toml")
    }

    /// Loads configuration from the given file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads configuration from the given path, or the default path when
    /// none is supplied. A missing file yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves the configuration to the given file, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validates every field, returning the first violation.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.daemon.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        self.bind_addr()?;

        if self.session.max_sessions == 0 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.output_buffer == 0 {
            return Err(ConfigError::InvalidOutputBuffer);
        }

        for project in &self.projects {
            if project.id.is_empty() {
                return Err(ConfigError::EmptyProjectId);
            }
            if project.command.is_empty() {
                return Err(ConfigError::EmptyProjectCommand(project.id.clone()));
            }
        }

        Ok(())
    }

    /// Parses the configured listen address.
    pub fn bind_addr(&self) -> std::result::Result<SocketAddr, ConfigError> {
        self.server
            .bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(self.server.bind_addr.clone()))
    }
}
