//! Session management module.
//!
//! This module maps client connections to sessions and sessions to their
//! backing child processes. The manager owns all session state in a
//! single event-loop task; processes are driven through bounded-lifetime
//! event streams.

pub mod manager;
pub mod process;

pub use manager::{ConnectError, ConnectionId, ManagerEvent, ManagerHandle, SessionManager};
pub use process::{ProcessError, ProcessEvent, ProcessHandle};
