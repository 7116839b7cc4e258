//! Command routing for console input.
//!
//! A line of input is matched case-insensitively against the fixed
//! built-in vocabulary; anything else is forwarded to the session's
//! running process, or answered with a hint when nothing is running.
//! Routing is a pure function: it returns the notifications to emit and
//! a directive describing the side effect the session manager must
//! perform. It never touches the session itself.

use std::time::Duration;

use protocol::ServerMessage;

use crate::registry::ProjectRegistry;

/// The fixed built-in command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Run,
    Status,
    Stop,
    Projects,
    Info,
}

impl Command {
    /// Case-insensitive match against the vocabulary.
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "help" => Some(Self::Help),
            "run" => Some(Self::Run),
            "status" => Some(Self::Status),
            "stop" => Some(Self::Stop),
            "projects" => Some(Self::Projects),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

/// Side effect the session manager performs after routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Replies only, no side effect.
    None,

    /// Spawn the project's process for this session.
    Spawn {
        /// Registered project id to spawn.
        project: String,
    },

    /// Send the running process a termination signal.
    Terminate,

    /// Forward text to the running process's stdin.
    Forward(String),
}

/// Read-only view of a session's running process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessView {
    /// Whether the child is still alive.
    pub running: bool,
    /// Time since spawn.
    pub uptime: Duration,
    /// Child process id.
    pub pid: Option<u32>,
}

/// Everything the router needs beyond the command text.
pub struct RouterContext<'a> {
    /// Effective project id for this message (override, session
    /// selection, or the literal `"default"`).
    pub project: &'a str,
    /// The session's process, if one exists.
    pub process: Option<ProcessView>,
    /// Number of live connections.
    pub connections: usize,
    /// Resident memory of the daemon, in bytes.
    pub memory_bytes: u64,
    /// The project registry.
    pub registry: &'a ProjectRegistry,
}

impl RouterContext<'_> {
    fn process_live(&self) -> bool {
        self.process.is_some()
    }
}

/// Result of routing one line of input.
#[derive(Debug)]
pub struct Routed {
    /// Notifications to emit to the session, in order.
    pub replies: Vec<ServerMessage>,
    /// Side effect to perform.
    pub directive: Directive,
}

impl Routed {
    fn reply(message: ServerMessage) -> Self {
        Self {
            replies: vec![message],
            directive: Directive::None,
        }
    }

    fn with_directive(message: ServerMessage, directive: Directive) -> Self {
        Self {
            replies: vec![message],
            directive,
        }
    }
}

/// Routes one line of console input.
pub fn route(input: &str, ctx: &RouterContext<'_>) -> Routed {
    let input = input.trim();

    match Command::parse(input) {
        Some(Command::Help) => Routed::reply(ServerMessage::output(help_text())),

        Some(Command::Run) => {
            if ctx.process_live() {
                Routed::reply(ServerMessage::output(
                    "A process is already running. Send \"stop\" first.",
                ))
            } else if !ctx.registry.contains(ctx.project) {
                Routed::reply(ServerMessage::error(format!(
                    "Unknown project: {}. Send \"projects\" for the catalog.",
                    ctx.project
                )))
            } else {
                Routed::with_directive(
                    ServerMessage::output(format!("Starting {} application...", ctx.project)),
                    Directive::Spawn {
                        project: ctx.project.to_string(),
                    },
                )
            }
        }

        Some(Command::Status) => Routed::reply(ServerMessage::output(status_text(ctx))),

        Some(Command::Stop) => {
            if ctx.process_live() {
                Routed::with_directive(
                    ServerMessage::output("Stopping process..."),
                    Directive::Terminate,
                )
            } else {
                Routed::reply(ServerMessage::output("Nothing running."))
            }
        }

        Some(Command::Projects) => Routed::reply(ServerMessage::output(projects_text(ctx))),

        Some(Command::Info) => Routed::reply(ServerMessage::output(info_text(ctx))),

        // Unrecognized input always reaches the running process; the
        // router never command-matches in-process interactive input.
        None if ctx.process_live() => Routed {
            replies: Vec::new(),
            directive: Directive::Forward(format!("{input}\n")),
        },

        None => Routed::reply(ServerMessage::output(format!(
            "Command not recognized: {input}. Send \"help\" for available commands.",
        ))),
    }
}

fn help_text() -> String {
    [
        "Available commands:",
        "  help      - show this message",
        "  run       - start the selected project's process",
        "  status    - show connection and process status",
        "  stop      - terminate the running process",
        "  projects  - list available projects",
        "  info      - show details for the selected project",
        "Anything else is forwarded to the running process.",
    ]
    .join("\n")
}

fn status_text(ctx: &RouterContext<'_>) -> String {
    let process = match &ctx.process {
        Some(view) if view.running => match view.pid {
            Some(pid) => format!("running (pid {}, up {}s)", pid, view.uptime.as_secs()),
            None => format!("running (up {}s)", view.uptime.as_secs()),
        },
        Some(_) => "stopping".to_string(),
        None => "none".to_string(),
    };

    format!(
        "Connections: {}\nProject: {}\nProcess: {}\nMemory: {:.1} MB",
        ctx.connections,
        ctx.project,
        process,
        ctx.memory_bytes as f64 / (1024.0 * 1024.0),
    )
}

fn projects_text(ctx: &RouterContext<'_>) -> String {
    let mut lines = vec!["Available projects:".to_string()];
    for descriptor in ctx.registry.catalog() {
        lines.push(format!("  {} - {}", descriptor.id, descriptor.description));
    }
    lines.join("\n")
}

fn info_text(ctx: &RouterContext<'_>) -> String {
    let descriptor = ctx.registry.descriptor(ctx.project);
    format!(
        "{}\n  {}\n  Tech: {}\n  Repository: {}",
        descriptor.id,
        descriptor.description,
        descriptor.tech.join(", "),
        descriptor.repository,
    )
}
