//! # Termbridge Protocol Library
//!
//! This crate provides the wire protocol definitions shared by the
//! Termbridge daemon and its clients.
//!
//! ## Overview
//!
//! Clients hold a persistent bidirectional connection to the daemon and
//! exchange JSON text frames:
//!
//! - [`ClientMessage`]: inbound frames (`input` lines and `init` project
//!   selection)
//! - [`ServerMessage`]: outbound frames (`system` notices, relayed
//!   `output`, and `error` notifications)
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, ServerMessage};
//!
//! let inbound = ClientMessage::from_json(r#"{"type":"input","content":"help"}"#).unwrap();
//! assert!(matches!(inbound, ClientMessage::Input { .. }));
//!
//! let outbound = ServerMessage::output("hello");
//! assert_eq!(outbound.to_json(), r#"{"type":"output","content":"hello"}"#);
//! ```

pub mod messages;

pub use messages::{ClientMessage, ServerMessage};
