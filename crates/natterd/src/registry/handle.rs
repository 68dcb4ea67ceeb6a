//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::Closed`

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use natter_core::SessionName;

use super::commands::{RegistryCommand, RegistryError, RemovalReason, SessionTicket};

/// Upper bound on how long a single long-poll may park.
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(30);

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.register("alice").await?;
/// handle.say("alice", "hello").await?;
/// let mail = handle.check_messages("alice", None).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Log a new session on.
    ///
    /// The returned ticket identifies this registration; pass it to
    /// [`release`](Self::release) to log off only this registration.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidName` if the name fails validation
    /// - `RegistryError::NameConflict` if the name is taken
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn register(&self, name: &str) -> Result<SessionTicket, RegistryError> {
        let name = SessionName::parse(name)?;
        self.request(|respond_to| RegistryCommand::Register { name, respond_to })
            .await?
    }

    /// List logged-on names in registration order.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn list(&self, requester: &str) -> Result<Vec<String>, RegistryError> {
        let requester = requester.to_string();
        self.request(|respond_to| RegistryCommand::List {
            requester,
            respond_to,
        })
        .await
    }

    /// Drain a session's mailbox.
    ///
    /// With `wait` set and nothing pending, waits up to `wait` (capped at
    /// [`MAX_POLL_WAIT`]) for the next message and returns as soon as one
    /// arrives. An expired wait returns an empty batch. Unknown names always
    /// get an empty batch.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn check_messages(
        &self,
        name: &str,
        wait: Option<Duration>,
    ) -> Result<Vec<String>, RegistryError> {
        let wait = wait.map(|w| w.min(MAX_POLL_WAIT)).filter(|w| !w.is_zero());
        let (tx, mut rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::CheckMessages {
                name: name.to_string(),
                park: wait.is_some(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::Closed)?;

        let Some(wait) = wait else {
            return rx.await.map_err(|_| RegistryError::Closed)?;
        };

        match timeout(wait, &mut rx).await {
            Ok(result) => result.map_err(|_| RegistryError::Closed)?,
            Err(_) => {
                // Closing first guarantees the actor either delivered before
                // this point (and the batch is waiting in the channel) or
                // will see the send fail and keep the batch.
                rx.close();
                match rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Ok(Vec::new()),
                }
            }
        }
    }

    /// Broadcast to every session, sender included.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn say(&self, sender: &str, text: &str) -> Result<(), RegistryError> {
        let (sender, text) = (sender.to_string(), text.to_string());
        self.request(|respond_to| RegistryCommand::Say {
            sender,
            text,
            respond_to,
        })
        .await?
    }

    /// Direct message; an unknown recipient is reported to the sender's mailbox.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn tell(
        &self,
        sender: &str,
        recipient: &str,
        text: &str,
    ) -> Result<(), RegistryError> {
        let (sender, recipient, text) =
            (sender.to_string(), recipient.to_string(), text.to_string());
        self.request(|respond_to| RegistryCommand::Tell {
            sender,
            recipient,
            text,
            respond_to,
        })
        .await?
    }

    /// Log a session off.
    ///
    /// # Errors
    ///
    /// - `RegistryError::SessionNotFound` if no such session exists
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn logout(&self, name: &str) -> Result<(), RegistryError> {
        self.remove(name, None, RemovalReason::LoggedOut).await
    }

    /// Log off the registration `ticket` made, after its connection closed.
    ///
    /// Does nothing if the name has since been logged out and taken by
    /// someone else.
    ///
    /// # Errors
    ///
    /// - `RegistryError::SessionNotFound` if the name is gone or now belongs
    ///   to another registration
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn release(&self, name: &str, ticket: SessionTicket) -> Result<(), RegistryError> {
        self.remove(name, Some(ticket), RemovalReason::Disconnected).await
    }

    async fn remove(
        &self,
        name: &str,
        owner: Option<SessionTicket>,
        reason: RemovalReason,
    ) -> Result<(), RegistryError> {
        let name = name.to_string();
        self.request(|respond_to| RegistryCommand::Logout {
            name,
            owner,
            reason,
            respond_to,
        })
        .await?
    }

    /// Stop the registry if `secret` matches the configured one.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Unauthorized` on mismatch; the registry keeps serving
    /// - `RegistryError::Closed` if the registry has already shut down
    pub async fn shutdown(&self, requester: &str, secret: &str) -> Result<(), RegistryError> {
        let (requester, secret) = (requester.to_string(), secret.to_string());
        self.request(|respond_to| RegistryCommand::Shutdown {
            requester,
            secret,
            respond_to,
        })
        .await?
    }

    /// Ask the actor to log off idle sessions. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Closed` if the registry has shut down
    pub async fn reap_idle(&self) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::ReapIdle)
            .await
            .map_err(|_| RegistryError::Closed)
    }

    /// Sends a command built around a fresh responder and awaits the reply.
    async fn request<T, F>(&self, build: F) -> Result<T, RegistryError>
    where
        F: FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::Closed)?;

        rx.await.map_err(|_| RegistryError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        (RegistryHandle::new(cmd_tx), cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_register_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Register { name, respond_to }) = rx.recv().await {
                assert_eq!(name.as_str(), "alice");
                let _ = respond_to.send(Ok(SessionTicket::new(7)));
                return true;
            }
            false
        });

        assert_eq!(handle.register("alice").await, Ok(SessionTicket::new(7)));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_release_carries_ticket() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Logout {
                name,
                owner,
                reason,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(name, "alice");
                assert_eq!(owner, Some(SessionTicket::new(3)));
                assert_eq!(reason, RemovalReason::Disconnected);
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        assert!(handle.release("alice", SessionTicket::new(3)).await.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_register_validates_before_sending() {
        let (handle, mut rx) = create_test_handle();

        let result = handle.register("two words").await;
        assert!(matches!(result, Err(RegistryError::InvalidName(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.register("alice").await;
        assert_eq!(result, Err(RegistryError::Closed));
    }

    #[tokio::test]
    async fn test_dropped_responder_is_closed_error() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            // Receive and drop the command without answering.
            let _ = rx.recv().await;
        });

        assert_eq!(handle.say("alice", "hi").await, Err(RegistryError::Closed));
    }

    #[tokio::test]
    async fn test_check_messages_without_wait_does_not_park() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            if let Some(RegistryCommand::CheckMessages {
                park, respond_to, ..
            }) = rx.recv().await
            {
                assert!(!park);
                let _ = respond_to.send(Ok(vec!["hello".to_string()]));
            }
        });

        let batch = handle.check_messages("alice", None).await.unwrap();
        assert_eq!(batch, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_check_messages_zero_wait_does_not_park() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            if let Some(RegistryCommand::CheckMessages {
                park, respond_to, ..
            }) = rx.recv().await
            {
                assert!(!park);
                let _ = respond_to.send(Ok(Vec::new()));
            }
        });

        let batch = handle
            .check_messages("alice", Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_messages_wait_expires_empty() {
        let (handle, mut rx) = create_test_handle();

        let parked = tokio::spawn(async move {
            // Hold the responder past the wait without answering.
            let cmd = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(cmd);
        });

        let batch = handle
            .check_messages("alice", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(batch.is_empty());
        parked.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_messages_wait_is_capped() {
        let (handle, mut rx) = create_test_handle();

        let _parked = tokio::spawn(async move {
            let cmd = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(cmd);
        });

        let start = tokio::time::Instant::now();
        let _ = handle
            .check_messages("alice", Some(Duration::from_secs(600)))
            .await;
        assert!(start.elapsed() <= MAX_POLL_WAIT + Duration::from_secs(1));
    }
}
