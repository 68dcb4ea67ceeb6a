//! TCP server for natterd.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Stops accepting when the shutdown token is cancelled, then gives
//!   in-flight requests a grace period to finish
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │                 │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{error_code, ConnectionError, ConnectionHandler, MAX_MESSAGE_SIZE};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::RegistryHandle;

/// Default idle timeout for client connections (5 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long in-flight requests get to finish after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// TCP server for natterd.
///
/// Accepts connections and hands each one to a `ConnectionHandler`.
pub struct ChatServer {
    /// Bound listener
    listener: TcpListener,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs
    connection_counter: u64,

    /// Idle timeout applied to each connection
    idle_timeout: Duration,
}

impl ChatServer {
    /// Binds the listener.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on, e.g. `0.0.0.0:3410`
    /// * `registry` - Handle to the session registry
    /// * `cancel_token` - Token for graceful shutdown
    pub async fn bind(
        addr: &str,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            cancel_token,
            connection_counter: 0,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// Sets the idle timeout for client connections.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Chat server listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                // Reap finished connection tasks
                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            self.connection_counter = self.connection_counter.saturating_add(1);
                            debug!(peer = %peer, connection = self.connection_counter, "Accepted connection");
                            connections.spawn(self.connection(stream).run());
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        self.drain(connections).await;
        Ok(())
    }

    /// Builds the handler for a newly accepted connection.
    fn connection(&self, stream: TcpStream) -> ConnectionHandler {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        ConnectionHandler::new(
            reader,
            writer,
            self.registry.clone(),
            self.cancel_token.clone(),
            self.connection_counter,
            self.idle_timeout,
        )
    }

    /// Waits for open connections to finish their current request.
    async fn drain(&self, mut connections: JoinSet<()>) {
        let open = connections.len();
        if open == 0 {
            info!("Server stopped");
            return;
        }

        debug!(open, "Waiting for connections to finish");
        let finished = timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = connections.len(),
                "Connections still open after grace period, aborting"
            );
            connections.abort_all();
        }

        info!("Server stopped");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{spawn_registry, RegistrySettings};

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:3410".to_string(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:3410"));
        assert!(err.to_string().contains("address in use"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let token = CancellationToken::new();
        let registry = spawn_registry(RegistrySettings::default(), token.clone());

        let server = ChatServer::bind("127.0.0.1:0", registry, token.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        token.cancel();
    }

    #[tokio::test]
    async fn test_bind_invalid_address_fails() {
        let token = CancellationToken::new();
        let registry = spawn_registry(RegistrySettings::default(), token.clone());

        let result = ChatServer::bind("not an address", registry, token.clone()).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));

        token.cancel();
    }

    #[tokio::test]
    async fn test_run_returns_after_cancel() {
        let token = CancellationToken::new();
        let registry = spawn_registry(RegistrySettings::default(), token.clone());
        let server = ChatServer::bind("127.0.0.1:0", registry, token.clone())
            .await
            .unwrap();

        let run = tokio::spawn(server.run());
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
