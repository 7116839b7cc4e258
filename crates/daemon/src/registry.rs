//! Project registry.
//!
//! Maps project identifiers to descriptive metadata and to the command
//! that backs them. The registry is built once at startup from the
//! built-in table merged with `[[projects]]` entries from the
//! configuration file; config entries override built-ins by id.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ProjectConfig;
use crate::session::{ProcessEvent, ProcessHandle};

/// Project used when a session never selected one, and whose descriptor
/// backs `info` for unknown ids.
pub const DEFAULT_PROJECT: &str = "cpu-scheduler";

/// Errors that can occur when starting a project's process.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The id is not in the registry.
    #[error("unknown project: {0}")]
    UnknownProject(String),

    /// The process could not be started.
    #[error("failed to start process: {0}")]
    Process(#[from] crate::session::ProcessError),
}

/// Static metadata describing one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDescriptor {
    /// Project identifier.
    pub id: String,
    /// One-line description.
    pub description: String,
    /// Technologies the project is built with, in display order.
    pub tech: Vec<String>,
    /// Source repository URL.
    pub repository: String,
}

/// One registry entry: descriptor plus the command that backs it.
#[derive(Debug, Clone)]
pub struct ProjectEntry {
    /// Descriptive metadata.
    pub descriptor: ProjectDescriptor,
    /// Program to spawn.
    pub command: String,
    /// Arguments to the program.
    pub args: Vec<String>,
}

/// Registry of runnable projects, keyed by id.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    entries: BTreeMap<String, ProjectEntry>,
}

impl ProjectRegistry {
    /// Creates a registry containing only the built-in projects.
    ///
    /// Built-ins are backed by small shell stand-ins so the daemon is
    /// runnable without any configuration.
    pub fn builtin() -> Self {
        let mut registry = Self {
            entries: BTreeMap::new(),
        };
        for entry in builtin_entries() {
            registry.insert(entry);
        }
        registry
    }

    /// Creates a registry from the built-ins merged with config entries.
    ///
    /// Config entries win on id collision, so deployments can replace a
    /// built-in stand-in with a real program.
    pub fn from_config(projects: &[ProjectConfig]) -> Self {
        let mut registry = Self::builtin();
        for project in projects {
            registry.insert(ProjectEntry::from(project));
        }
        registry
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, entry: ProjectEntry) {
        self.entries.insert(entry.descriptor.id.clone(), entry);
    }

    /// Returns whether an id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the descriptor for an id, falling back to the default
    /// project's descriptor when the id is unknown.
    pub fn descriptor(&self, id: &str) -> &ProjectDescriptor {
        self.entries
            .get(id)
            .map(|entry| &entry.descriptor)
            .unwrap_or_else(|| self.default_descriptor())
    }

    /// Returns the default project's descriptor.
    pub fn default_descriptor(&self) -> &ProjectDescriptor {
        // The default project is part of the built-in table and config
        // merging never removes entries, so the lookup cannot miss.
        &self
            .entries
            .get(DEFAULT_PROJECT)
            .expect("default project missing from registry")
            .descriptor
    }

    /// Iterates over every registered descriptor in id order.
    pub fn catalog(&self) -> impl Iterator<Item = &ProjectDescriptor> {
        self.entries.values().map(|entry| &entry.descriptor)
    }

    /// Starts the process backing a registered project.
    pub fn spawn(
        &self,
        id: &str,
    ) -> Result<(ProcessHandle, mpsc::Receiver<ProcessEvent>), SpawnError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| SpawnError::UnknownProject(id.to_string()))?;

        tracing::info!(
            project = %id,
            command = %entry.command,
            "Spawning project process"
        );

        Ok(ProcessHandle::spawn(&entry.command, &entry.args)?)
    }
}

impl From<&ProjectConfig> for ProjectEntry {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            descriptor: ProjectDescriptor {
                id: config.id.clone(),
                description: config.description.clone(),
                tech: config.tech.clone(),
                repository: config.repository.clone(),
            },
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }
}

/// Shell stand-in entry used for built-in projects.
fn stand_in(
    id: &str,
    description: &str,
    tech: &[&str],
    repository: &str,
    script: &str,
) -> ProjectEntry {
    ProjectEntry {
        descriptor: ProjectDescriptor {
            id: id.to_string(),
            description: description.to_string(),
            tech: tech.iter().map(|t| (*t).to_string()).collect(),
            repository: repository.to_string(),
        },
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

fn builtin_entries() -> Vec<ProjectEntry> {
    vec![
        stand_in(
            "cpu-scheduler",
            "Preemptive CPU scheduler simulation with round-robin and priority queues",
            &["c", "posix-threads"],
            "https://github.com/termbridge/cpu-scheduler",
            "i=0; while [ $i -lt 60 ]; do \
               echo \"tick $i: dispatching task $((i % 4)) (quantum 20ms)\"; \
               i=$((i+1)); sleep 1; \
             done; echo 'scheduler run complete'",
        ),
        stand_in(
            "memory-allocator",
            "Slab allocator with live fragmentation and utilization reporting",
            &["rust"],
            "https://github.com/termbridge/memory-allocator",
            "i=0; while [ $i -lt 60 ]; do \
               echo \"alloc #$i: slab $((i % 8)), $(( (i * 37) % 4096 )) bytes in use\"; \
               i=$((i+1)); sleep 1; \
             done; echo 'allocator run complete'",
        ),
        stand_in(
            "packet-filter",
            "Userspace packet filter with per-rule match counters",
            &["c", "libpcap"],
            "https://github.com/termbridge/packet-filter",
            "i=0; while [ $i -lt 60 ]; do \
               echo \"pkt $i: rule $((i % 3)) matched, $((i * 11 % 1500)) bytes\"; \
               i=$((i+1)); sleep 1; \
             done; echo 'capture complete'",
        ),
    ]
}
