//! natter - terminal chat client library
//!
//! The binary keeps two connections to the server:
//!
//! 1. **Command connection**: the terminal loop's requests plus a periodic
//!    heartbeat, shared behind a mutex
//! 2. **Delivery connection**: used only by the delivery loop, which
//!    long-polls the mailbox and prints whatever arrives
//!
//! Keeping the long-poll on its own connection means a parked poll never
//! delays a command.

pub mod client;
pub mod error;
pub mod input;

// Re-export commonly used types
pub use client::{normalize_address, ChatClient};
pub use error::{ClientError, Result};
pub use input::{parse_line, Action};
