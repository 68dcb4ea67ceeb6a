//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming requests
//! - Routes them to the registry
//! - Answers every request with exactly one response, in order
//! - Logs off sessions the connection registered if it closes without logging out
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use natter_core::SessionName;
use natter_protocol::{ClientMessage, ErrorCode, MessageType, ProtocolVersion, ServerMessage};

use crate::registry::{RegistryError, RegistryHandle, SessionTicket};

/// Maximum request size (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier for this connection
type ClientId = String;

/// Connection handler for a single client.
///
/// Manages the lifecycle of a client connection including:
/// - Protocol handshake
/// - Request processing loop
/// - Logging off sessions orphaned by a dropped connection
pub struct ConnectionHandler {
    /// Buffered reader for incoming requests
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for responses
    writer: BufWriter<OwnedWriteHalf>,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Stops the request loop between requests
    cancel_token: CancellationToken,

    /// Unique client identifier (assigned after handshake)
    client_id: Option<ClientId>,

    /// Sequence number of this connection
    connection_number: u64,

    /// Remote address, for logs
    peer: SocketAddr,

    /// Connections silent for this long are closed
    idle_timeout: Duration,

    /// Registrations made over this connection and not yet logged out
    registered: Vec<(String, SessionTicket)>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `reader` - Read half of the TCP stream
    /// * `writer` - Write half of the TCP stream
    /// * `registry` - Handle to the session registry
    /// * `cancel_token` - Server shutdown token
    /// * `connection_number` - Unique number for this connection
    /// * `idle_timeout` - How long to wait for the next request
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
        connection_number: u64,
        idle_timeout: Duration,
    ) -> Self {
        let peer = reader
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));

        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            registry,
            cancel_token,
            client_id: None,
            connection_number,
            peer,
            idle_timeout,
            registered: Vec::new(),
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake, then processes requests until the client
    /// disconnects, goes idle, or the server shuts down.
    pub async fn run(mut self) {
        debug!(
            connection = self.connection_number,
            peer = %self.peer,
            "New client connected"
        );

        match self.handle_handshake().await {
            Ok(()) => {
                debug!(client_id = ?self.client_id, "Client handshake completed");
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    peer = %self.peer,
                    error = %e,
                    "Handshake failed"
                );
                return;
            }
        }

        if let Err(e) = self.process_messages().await {
            debug!(
                client_id = ?self.client_id,
                error = %e,
                "Connection closed"
            );
        }

        self.log_off_orphans().await;
        debug!(client_id = ?self.client_id, "Client disconnected");
    }

    /// Handles the initial protocol handshake.
    ///
    /// Expects a `Connect` message from the client, validates the protocol
    /// version, and responds with `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(self.idle_timeout, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(ServerMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id = client_id
                    .unwrap_or_else(|| format!("client-{}", self.connection_number));

                self.client_id = Some(assigned_id.clone());
                self.send_message(ServerMessage::connected(assigned_id))
                    .await?;

                Ok(())
            }
            other => {
                self.send_message(ServerMessage::error(
                    "Expected connect message for handshake",
                    ErrorCode::BadRequest,
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(other.label().to_string()))
            }
        }
    }

    /// Main request processing loop.
    ///
    /// Reads and answers requests until the connection closes, an
    /// unrecoverable error occurs, or the server shuts down. A request
    /// already being handled always completes first.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let cancel_token = self.cancel_token.clone();

        loop {
            let idle_timeout = self.idle_timeout;
            let read = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => None,
                read = timeout(idle_timeout, self.read_message()) => Some(read),
            };

            let Some(read) = read else {
                debug!(client_id = ?self.client_id, "Server shutting down, closing connection");
                return Ok(());
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(e))) => {
                    // A malformed line is the client's problem, not the connection's.
                    debug!(client_id = ?self.client_id, error = %e, "Malformed request");
                    self.send_message(ServerMessage::error(
                        &format!("Malformed request: {e}"),
                        ErrorCode::BadRequest,
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            let response = self.handle_message(msg.message).await?;
            self.send_message(response).await?;
        }
    }

    /// Handles a single request, producing its response.
    ///
    /// Registry errors become `error` responses; only a disconnect request
    /// ends the loop.
    async fn handle_message(&mut self, msg: MessageType) -> Result<ServerMessage, ConnectionError> {
        debug!(
            client_id = ?self.client_id,
            request = msg.label(),
            "Received request"
        );

        let response = match msg {
            MessageType::Connect { .. } => {
                ServerMessage::error("Already connected", ErrorCode::BadRequest)
            }

            MessageType::Register { name } => match SessionName::parse(&name) {
                Ok(name) => {
                    let result = self.registry.register(name.as_str()).await;
                    if let Ok(ticket) = result {
                        self.registered.push((name.into_inner(), ticket));
                    }
                    respond(result.map(|_| ServerMessage::Ack))
                }
                Err(e) => respond(Err(RegistryError::from(e))),
            },

            MessageType::List { name } => {
                respond(self.registry.list(&name).await.map(ServerMessage::names))
            }

            MessageType::CheckMessages { name, wait_ms } => {
                let wait = wait_ms.map(Duration::from_millis);
                respond(
                    self.registry
                        .check_messages(&name, wait)
                        .await
                        .map(ServerMessage::messages),
                )
            }

            MessageType::Say { sender, text } => respond(
                self.registry
                    .say(&sender, &text)
                    .await
                    .map(|()| ServerMessage::Ack),
            ),

            MessageType::Tell {
                sender,
                recipient,
                text,
            } => respond(
                self.registry
                    .tell(&sender, &recipient, &text)
                    .await
                    .map(|()| ServerMessage::Ack),
            ),

            MessageType::Logout { name } => {
                let result = self.registry.logout(&name).await;
                if result.is_ok() {
                    self.registered.retain(|(n, _)| n != &name);
                }
                respond(result.map(|()| ServerMessage::Ack))
            }

            MessageType::Shutdown { requester, secret } => respond(
                self.registry
                    .shutdown(&requester, &secret)
                    .await
                    .map(|()| ServerMessage::Ack),
            ),

            MessageType::Ping { seq } => ServerMessage::pong(seq),

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        };

        Ok(response)
    }

    /// Logs off every session this connection registered and never logged out.
    async fn log_off_orphans(&mut self) {
        for (name, ticket) in std::mem::take(&mut self.registered) {
            match self.registry.release(&name, ticket).await {
                Ok(()) => info!(
                    client_id = ?self.client_id,
                    name = %name,
                    "Logged off session after its connection closed"
                ),
                Err(e) => debug!(name = %name, error = %e, "Orphaned session already gone or taken over"),
            }
        }
    }

    /// Reads a single request line from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        // One byte past the limit is enough to detect an oversized line.
        let limit = (MAX_MESSAGE_SIZE + 1) as u64;
        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))
    }

    /// Sends a message to the client.
    async fn send_message(&mut self, msg: ServerMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Turns a registry result into the response line.
fn respond(result: Result<ServerMessage, RegistryError>) -> ServerMessage {
    match result {
        Ok(msg) => msg,
        Err(e) => ServerMessage::error(&e.to_string(), error_code(&e)),
    }
}

/// Maps registry errors onto wire error codes.
pub fn error_code(err: &RegistryError) -> ErrorCode {
    match err {
        RegistryError::NameConflict(_) => ErrorCode::NameConflict,
        RegistryError::SessionNotFound(_) => ErrorCode::SessionNotFound,
        RegistryError::Unauthorized { .. } => ErrorCode::Unauthorized,
        RegistryError::RegistryFull { .. } => ErrorCode::RegistryFull,
        RegistryError::InvalidName(_) => ErrorCode::InvalidName,
        RegistryError::Closed => ErrorCode::ShuttingDown,
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use natter_core::DomainError;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge {
            size: 2_000_000,
            max: MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("2000000"));
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            error_code(&RegistryError::NameConflict("a".into())),
            ErrorCode::NameConflict
        );
        assert_eq!(
            error_code(&RegistryError::SessionNotFound("a".into())),
            ErrorCode::SessionNotFound
        );
        assert_eq!(
            error_code(&RegistryError::Unauthorized {
                requester: "a".into()
            }),
            ErrorCode::Unauthorized
        );
        assert_eq!(
            error_code(&RegistryError::RegistryFull { max: 1 }),
            ErrorCode::RegistryFull
        );
        assert_eq!(
            error_code(&RegistryError::InvalidName(DomainError::InvalidName {
                name: String::new(),
                reason: "empty".into()
            })),
            ErrorCode::InvalidName
        );
        assert_eq!(error_code(&RegistryError::Closed), ErrorCode::ShuttingDown);
    }

    #[test]
    fn test_respond_wraps_errors() {
        let msg = respond(Err(RegistryError::SessionNotFound("ghost".into())));
        assert_eq!(
            msg,
            ServerMessage::Error {
                message: "session not found: ghost".to_string(),
                code: Some(ErrorCode::SessionNotFound),
            }
        );
        assert_eq!(respond(Ok(ServerMessage::Ack)), ServerMessage::Ack);
    }
}
