//! Error types for the natter client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use natter_protocol::ErrorCode;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Client errors.
///
/// Transport-level variants (`Connection`, `Io`, `Closed`, `Timeout`) end the
/// client; `Server` carries a request the server refused, which the terminal
/// loop reports and moves past.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to reach the server.
    #[error("Failed to connect to server at {addr}: {error}")]
    Connection { addr: String, error: String },

    /// Protocol version mismatch with server
    ///
    /// Client and server must agree on the protocol's major version.
    #[error("Protocol version mismatch (client: {client_version}, server: {server_version})")]
    VersionMismatch {
        /// The protocol version this client speaks.
        client_version: String,
        /// The protocol version the server is running.
        server_version: String,
    },

    /// The server answered with something other than what the request expects.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused the request.
    #[error("{message}")]
    Server {
        code: Option<ErrorCode>,
        message: String,
    },

    /// The server closed the connection.
    #[error("Server closed the connection")]
    Closed,

    /// No response within the allotted time.
    #[error("Timed out waiting for the server")]
    Timeout,

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON parse error passthrough.
    #[error("Failed to parse message: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ClientError {
    /// The server's error code, if the server refused the request.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Server { code, .. } => *code,
            _ => None,
        }
    }

    /// True if the connection itself failed rather than a single request.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Server { .. })
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let error = ClientError::Connection {
            addr: "localhost:3410".to_string(),
            error: "refused".to_string(),
        };
        let display = format!("{error}");
        assert!(display.contains("localhost:3410"));
        assert!(display.contains("refused"));
    }

    #[test]
    fn test_version_mismatch_error_display() {
        let error = ClientError::VersionMismatch {
            client_version: "1.0".to_string(),
            server_version: "2.0".to_string(),
        };
        let display = format!("{error}");
        assert!(display.contains("client: 1.0"));
        assert!(display.contains("server: 2.0"));
    }

    #[test]
    fn test_server_error_shows_message_only() {
        let error = ClientError::Server {
            code: Some(ErrorCode::NameConflict),
            message: "name already taken: alice".to_string(),
        };
        assert_eq!(error.to_string(), "name already taken: alice");
        assert_eq!(error.code(), Some(ErrorCode::NameConflict));
        assert!(!error.is_transport());
    }

    #[test]
    fn test_transport_errors() {
        assert!(ClientError::Closed.is_transport());
        assert!(ClientError::Timeout.is_transport());
        assert_eq!(ClientError::Closed.code(), None);
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_error = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let error: ClientError = io_error.into();
        assert!(matches!(error, ClientError::Io(_)));
        assert!(error.to_string().contains("IO error"));
    }

    #[test]
    fn test_parse_error_from_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let error: ClientError = json_error.into();
        assert!(matches!(error, ClientError::Parse(_)));
    }
}
