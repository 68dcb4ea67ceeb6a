//! natter protocol - Wire protocol for chat client/server communication
//!
//! Messages are newline-delimited JSON. Every request line a client sends
//! is answered by exactly one response line, in order.

pub mod message;
pub mod version;

pub use message::{ClientMessage, ErrorCode, MessageType, ServerMessage};
pub use version::ProtocolVersion;

/// TCP port the server listens on and clients dial when none is given.
pub const DEFAULT_PORT: u16 = 3410;
