//! Protocol message types for chat client/server communication.

use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requests a client can send to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake; must be the first message on a connection
    Connect {
        /// Client identifier (optional)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Log on under a display name
    Register { name: String },

    /// List everyone currently logged on (`name` is the caller, for audit)
    List { name: String },

    /// Drain the caller's mailbox
    CheckMessages {
        name: String,
        /// Park for up to this long if the mailbox is empty
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_ms: Option<u64>,
    },

    /// Broadcast to every session
    Say { sender: String, text: String },

    /// Direct message to one session
    Tell {
        sender: String,
        recipient: String,
        text: String,
    },

    /// Log off
    Logout { name: String },

    /// Stop the server if `secret` matches the configured one
    Shutdown { requester: String, secret: String },

    /// Keepalive
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

impl MessageType {
    /// Short label for log lines. Never includes message bodies or secrets.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Register { .. } => "register",
            Self::List { .. } => "list",
            Self::CheckMessages { .. } => "check_messages",
            Self::Say { .. } => "say",
            Self::Tell { .. } => "tell",
            Self::Logout { .. } => "logout",
            Self::Shutdown { .. } => "shutdown",
            Self::Ping { .. } => "ping",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn register(name: impl Into<String>) -> Self {
        Self::new(MessageType::Register { name: name.into() })
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self::new(MessageType::List { name: name.into() })
    }

    pub fn check_messages(name: impl Into<String>, wait_ms: Option<u64>) -> Self {
        Self::new(MessageType::CheckMessages {
            name: name.into(),
            wait_ms,
        })
    }

    pub fn say(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageType::Say {
            sender: sender.into(),
            text: text.into(),
        })
    }

    pub fn tell(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::Tell {
            sender: sender.into(),
            recipient: recipient.into(),
            text: text.into(),
        })
    }

    pub fn logout(name: impl Into<String>) -> Self {
        Self::new(MessageType::Logout { name: name.into() })
    }

    pub fn shutdown(requester: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::new(MessageType::Shutdown {
            requester: requester.into(),
            secret: secret.into(),
        })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Machine-readable error classes carried by [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Another session already uses the requested name
    NameConflict,
    /// The named session is not logged on
    SessionNotFound,
    /// Wrong shutdown secret
    Unauthorized,
    /// Server is at its session limit
    RegistryFull,
    /// Name failed validation
    InvalidName,
    /// Server is shutting down and no longer services requests
    ShuttingDown,
    /// The request could not be parsed or was out of place
    BadRequest,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NameConflict => "name_conflict",
            Self::SessionNotFound => "session_not_found",
            Self::Unauthorized => "unauthorized",
            Self::RegistryFull => "registry_full",
            Self::InvalidName => "invalid_name",
            Self::ShuttingDown => "shutting_down",
            Self::BadRequest => "bad_request",
        };
        f.write_str(s)
    }
}

/// Messages sent from server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted
    Connected {
        /// Server's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Server's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Request succeeded with no payload
    Ack,

    /// Response to `list`, in registration order
    Names { names: Vec<String> },

    /// Response to `check_messages`, oldest first
    Messages { messages: Vec<String> },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl ServerMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn names(names: Vec<String>) -> Self {
        Self::Names { names }
    }

    pub fn messages(messages: Vec<String>) -> Self {
        Self::Messages { messages }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response with code.
    pub fn error(message: &str, code: ErrorCode) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code),
        }
    }
}
