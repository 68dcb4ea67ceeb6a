//! natter core - Shared types for the chat server and client
//!
//! This crate provides the core domain types shared between
//! the server (natterd) and the terminal client (natter).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod mailbox;
pub mod name;
pub mod notice;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use mailbox::Mailbox;
pub use name::{SessionName, DEFAULT_NAME, MAX_NAME_LEN};
pub use notice::Notice;
pub use session::Session;
