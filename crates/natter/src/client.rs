//! Server connection client for natter.
//!
//! This module provides the `ChatClient` which handles:
//! - Connection to the server over TCP and the protocol handshake
//! - One request/response round trip per chat operation
//! - Mapping server error responses onto `ClientError::Server`
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use natter_protocol::{ClientMessage, ProtocolVersion, ServerMessage, DEFAULT_PORT};

use crate::error::{ClientError, Result};

/// Host used when the address names none.
pub const DEFAULT_HOST: &str = "localhost";

/// How long to wait for an ordinary response.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Address Handling
// ============================================================================

/// Completes a user-supplied server address.
///
/// - nothing → `localhost:3410`
/// - `:4000` → `localhost:4000`
/// - `chat.example.org` → `chat.example.org:3410`
/// - anything with a `:` is used as given
pub fn normalize_address(address: Option<&str>) -> String {
    match address.map(str::trim) {
        None | Some("") => format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
        Some(addr) if addr.starts_with(':') => format!("{DEFAULT_HOST}{addr}"),
        Some(addr) if !addr.contains(':') => format!("{addr}:{DEFAULT_PORT}"),
        Some(addr) => addr.to_string(),
    }
}

// ============================================================================
// Chat Client
// ============================================================================

/// A connection to the chat server, acting for one user name.
///
/// Requests are strictly sequential: each method writes one request line
/// and reads its response before returning.
///
/// # Example
///
/// ```rust,ignore
/// use natter::ChatClient;
///
/// let mut client = ChatClient::connect("localhost:3410", "alice").await?;
/// client.register().await?;
/// client.say("hello").await?;
/// let mail = client.check_messages(None).await?;
/// ```
pub struct ChatClient {
    /// User name this connection acts for.
    name: String,

    /// Identifier the server assigned during the handshake.
    client_id: String,

    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,

    /// Next heartbeat sequence number.
    next_seq: u64,
}

impl ChatClient {
    /// Connects to `addr` and performs the protocol handshake.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` if the server cannot be reached
    /// - `ClientError::VersionMismatch` if the server speaks another major version
    pub async fn connect(addr: &str, name: &str) -> Result<Self> {
        debug!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::Connection {
                addr: addr.to_string(),
                error: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let mut client = Self {
            name: name.to_string(),
            client_id: String::new(),
            reader: BufReader::new(reader),
            writer,
            next_seq: 0,
        };

        client.handshake().await?;
        Ok(client)
    }

    /// The user name this connection acts for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identifier the server assigned to this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Logs this user on.
    pub async fn register(&mut self) -> Result<()> {
        let msg = ClientMessage::register(self.name.as_str());
        self.expect_ack("register", msg).await
    }

    /// Names of everyone logged on, in the order they logged on.
    pub async fn list(&mut self) -> Result<Vec<String>> {
        let msg = ClientMessage::list(self.name.as_str());
        match self.call(msg, RESPONSE_TIMEOUT).await? {
            ServerMessage::Names { names } => Ok(names),
            other => Err(unexpected("list", &other)),
        }
    }

    /// Drains this user's mailbox.
    ///
    /// With `wait` set, the server holds the request until a message arrives
    /// or the wait runs out, whichever comes first.
    pub async fn check_messages(&mut self, wait: Option<Duration>) -> Result<Vec<String>> {
        let wait_ms = wait.map(|w| u64::try_from(w.as_millis()).unwrap_or(u64::MAX));
        let msg = ClientMessage::check_messages(self.name.as_str(), wait_ms);
        let deadline = wait.unwrap_or_default().saturating_add(RESPONSE_TIMEOUT);

        match self.call(msg, deadline).await? {
            ServerMessage::Messages { messages } => Ok(messages),
            other => Err(unexpected("check_messages", &other)),
        }
    }

    /// Broadcasts `text` to everyone, this user included.
    pub async fn say(&mut self, text: &str) -> Result<()> {
        let msg = ClientMessage::say(self.name.as_str(), text);
        self.expect_ack("say", msg).await
    }

    /// Sends `text` to `recipient` only.
    pub async fn tell(&mut self, recipient: &str, text: &str) -> Result<()> {
        let msg = ClientMessage::tell(self.name.as_str(), recipient, text);
        self.expect_ack("tell", msg).await
    }

    /// Logs this user off.
    pub async fn logout(&mut self) -> Result<()> {
        let msg = ClientMessage::logout(self.name.as_str());
        self.expect_ack("logout", msg).await
    }

    /// Asks the server to shut down.
    pub async fn shutdown(&mut self, secret: &str) -> Result<()> {
        let msg = ClientMessage::shutdown(self.name.as_str(), secret);
        self.expect_ack("shutdown", msg).await
    }

    /// Round-trips a heartbeat, keeping the connection from idling out.
    pub async fn ping(&mut self) -> Result<()> {
        self.next_seq = self.next_seq.wrapping_add(1);
        let seq = self.next_seq;

        match self.call(ClientMessage::ping(seq), RESPONSE_TIMEOUT).await? {
            ServerMessage::Pong { seq: echoed } if echoed == seq => Ok(()),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Tells the server this connection is done. Best effort.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.send(&ClientMessage::disconnect()).await {
            debug!(error = %e, "Disconnect not delivered");
        }
    }

    // ========================================================================
    // Wire helpers
    // ========================================================================

    async fn handshake(&mut self) -> Result<()> {
        self.send(&ClientMessage::connect(Some(self.name.clone())))
            .await?;

        match self.recv(RESPONSE_TIMEOUT).await? {
            ServerMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        server_version: protocol_version.to_string(),
                    });
                }
                info!(
                    client_id = %client_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                self.client_id = client_id;
                Ok(())
            }
            ServerMessage::Rejected {
                protocol_version, ..
            } => Err(ClientError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                server_version: protocol_version.to_string(),
            }),
            ServerMessage::Error { code, message } => Err(ClientError::Server { code, message }),
            other => Err(unexpected("connect", &other)),
        }
    }

    async fn expect_ack(&mut self, request: &str, msg: ClientMessage) -> Result<()> {
        match self.call(msg, RESPONSE_TIMEOUT).await? {
            ServerMessage::Ack => Ok(()),
            other => Err(unexpected(request, &other)),
        }
    }

    /// Sends a request and reads its response; `error` responses become `Err`.
    async fn call(&mut self, msg: ClientMessage, wait: Duration) -> Result<ServerMessage> {
        self.send(&msg).await?;

        match self.recv(wait).await? {
            ServerMessage::Error { code, message } => Err(ClientError::Server { code, message }),
            other => Ok(other),
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(request = message.message.label(), "Sent request");
        Ok(())
    }

    async fn recv(&mut self, wait: Duration) -> Result<ServerMessage> {
        let mut line = String::new();
        let bytes_read = timeout(wait, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout)??;

        if bytes_read == 0 {
            return Err(ClientError::Closed);
        }

        Ok(serde_json::from_str(line.trim())?)
    }
}

fn unexpected(request: &str, response: &ServerMessage) -> ClientError {
    ClientError::Protocol(format!("Unexpected response to {request}: {response:?}"))
}
