//! Protocol message definitions for Termbridge.
//!
//! This module defines the message types exchanged between the daemon and
//! clients. All messages travel as JSON text frames with a `type` field
//! discriminating the variant.

use serde::{Deserialize, Serialize};

/// Message sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// A line of console input, interpreted as a built-in command or
    /// forwarded to the session's running process.
    Input {
        /// The raw input text.
        content: String,
        /// Per-message project override. When absent, the session's
        /// selected project applies.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project: Option<String>,
    },

    /// Selects the project for this session. Validation against the
    /// registry is deferred until `run`.
    Init {
        /// Project identifier to select.
        project: String,
    },
}

impl ClientMessage {
    /// Parse a message from a JSON text frame.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Notification sent from the daemon to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Connection lifecycle notices (welcome banner, project selection).
    System {
        /// Human-readable notice text.
        content: String,
    },

    /// Relayed process output and built-in command results.
    Output {
        /// Output text, passed through verbatim.
        content: String,
    },

    /// A recoverable failure, surfaced to this connection only.
    Error {
        /// Human-readable error text.
        content: String,
    },
}

impl ServerMessage {
    /// Create a `system` notification.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Create an `output` notification.
    pub fn output(content: impl Into<String>) -> Self {
        Self::Output {
            content: content.into(),
        }
    }

    /// Create an `error` notification.
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        // The enum has no non-serializable fields, so this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The wire tag of this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Output { .. } => "output",
            Self::Error { .. } => "error",
        }
    }

    /// The content text regardless of variant.
    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::Output { content } | Self::Error { content } => {
                content
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_message_parses() {
        let msg = ClientMessage::from_json(r#"{"type":"input","content":"run"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                content: "run".to_string(),
                project: None,
            }
        );
    }

    #[test]
    fn test_input_message_with_project_override() {
        let msg =
            ClientMessage::from_json(r#"{"type":"input","content":"run","project":"cpu-scheduler"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                content: "run".to_string(),
                project: Some("cpu-scheduler".to_string()),
            }
        );
    }

    #[test]
    fn test_init_message_parses() {
        let msg = ClientMessage::from_json(r#"{"type":"init","project":"cpu-scheduler"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Init {
                project: "cpu-scheduler".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"input"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"init"}"#).is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"resize","cols":80}"#).is_err());
    }

    #[test]
    fn test_invalid_syntax_is_rejected() {
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let json = ServerMessage::output("hello").to_json();
        assert_eq!(json, r#"{"type":"output","content":"hello"}"#);

        let json = ServerMessage::error("bad").to_json();
        assert_eq!(json, r#"{"type":"error","content":"bad"}"#);

        let json = ServerMessage::system("welcome").to_json();
        assert_eq!(json, r#"{"type":"system","content":"welcome"}"#);
    }

    #[test]
    fn test_server_message_accessors() {
        let msg = ServerMessage::error("boom");
        assert_eq!(msg.kind(), "error");
        assert_eq!(msg.content(), "boom");
    }
}
