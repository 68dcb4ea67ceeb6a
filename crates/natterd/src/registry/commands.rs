//! Registry actor commands and errors.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RemovalReason`: Why a session left the registry
//! - `SessionTicket`: Which registration a session belongs to
//!
//! All types are designed for async message passing and follow the panic-free policy.

use natter_core::{DomainError, SessionName};
use thiserror::Error;
use tokio::sync::oneshot;

/// Responder for operations that only acknowledge.
pub type Ack = oneshot::Sender<Result<(), RegistryError>>;

/// Responder for a registration.
pub type Admission = oneshot::Sender<Result<SessionTicket, RegistryError>>;

/// Responder for a mailbox drain.
pub type Delivery = oneshot::Sender<Result<Vec<String>, RegistryError>>;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each request carries a oneshot channel for the response. The actor
/// handles commands strictly one at a time, which is what makes every
/// operation atomic with respect to every other.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Log a new session on.
    ///
    /// # Errors
    /// - `RegistryError::NameConflict` if the name is taken
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Register {
        name: SessionName,
        respond_to: Admission,
    },

    /// List registered names in registration order.
    List {
        /// Caller, recorded for audit only
        requester: String,
        respond_to: oneshot::Sender<Vec<String>>,
    },

    /// Drain a session's mailbox.
    ///
    /// With `park` set and an empty mailbox, the responder is held until
    /// the next message for this session arrives. Unknown names get an
    /// empty batch.
    CheckMessages {
        name: String,
        park: bool,
        respond_to: Delivery,
    },

    /// Broadcast to every session, sender included.
    Say {
        sender: String,
        text: String,
        respond_to: Ack,
    },

    /// Direct message, with not-logged-on feedback to the sender.
    Tell {
        sender: String,
        recipient: String,
        text: String,
        respond_to: Ack,
    },

    /// Remove a session.
    ///
    /// With `owner` set, only the registration holding that ticket is
    /// removed; a session re-registered under the same name stays.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if no such session exists, or it
    ///   belongs to a different ticket than `owner`
    Logout {
        name: String,
        owner: Option<SessionTicket>,
        reason: RemovalReason,
        respond_to: Ack,
    },

    /// Stop the registry if the secret matches.
    ///
    /// # Errors
    /// - `RegistryError::Unauthorized` on mismatch (registry keeps serving)
    Shutdown {
        requester: String,
        secret: String,
        respond_to: Ack,
    },

    /// Log off sessions idle past the stale threshold.
    ///
    /// Fire-and-forget, sent by the cleanup task.
    ReapIdle,
}

// ============================================================================
// Session Tickets
// ============================================================================

/// Identifies one successful registration.
///
/// Tickets are never reused within a registry, so a name that was logged
/// off and taken again gets a different ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTicket(u64);

impl SessionTicket {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The requested name belongs to a logged-on session.
    #[error("name already taken: {0}")]
    NameConflict(String),

    /// No session is registered under this name.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Shutdown secret mismatch.
    #[error("shutdown not authorized for {requester}")]
    Unauthorized { requester: String },

    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull { max: usize },

    /// The requested name failed validation.
    #[error(transparent)]
    InvalidName(#[from] DomainError),

    /// The registry has shut down (or the actor is otherwise gone).
    #[error("registry is shut down")]
    Closed,
}

// ============================================================================
// Removal Reasons
// ============================================================================

/// Reason why a session was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The client logged out.
    LoggedOut,

    /// The connection that registered the session closed without logging out.
    Disconnected,

    /// No request named the session for longer than the stale threshold.
    Idle,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::Disconnected => write!(f, "connection closed"),
            Self::Idle => write!(f, "idle"),
        }
    }
}
