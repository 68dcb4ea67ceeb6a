//! The texts the registry appends to mailboxes.

use std::fmt;

/// A message destined for one or more mailboxes.
///
/// The rendered form (via `Display`) is exactly what the client prints,
/// so these strings are part of the user-facing contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice<'a> {
    /// Someone joined the chat.
    LoggedOn { name: &'a str },

    /// Someone left the chat (logout, disconnect or idle reaping).
    LoggedOff { name: &'a str },

    /// Broadcast to everyone.
    Says { sender: &'a str, text: &'a str },

    /// Direct message to one recipient.
    Tells { sender: &'a str, text: &'a str },

    /// Feedback to a sender whose direct message had no recipient.
    NotLoggedOn { recipient: &'a str },
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOn { name } => write!(f, "{name} has logged on"),
            Self::LoggedOff { name } => write!(f, "{name} has logged off"),
            Self::Says { sender, text } => write!(f, "{sender} says: {text}"),
            Self::Tells { sender, text } => write!(f, "{sender} tells you: {text}"),
            Self::NotLoggedOn { recipient } => write!(f, "{recipient} is not logged on"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_texts() {
        assert_eq!(
            Notice::LoggedOn { name: "bob" }.to_string(),
            "bob has logged on"
        );
        assert_eq!(
            Notice::LoggedOff { name: "bob" }.to_string(),
            "bob has logged off"
        );
        assert_eq!(
            Notice::Says {
                sender: "bob",
                text: "yo"
            }
            .to_string(),
            "bob says: yo"
        );
        assert_eq!(
            Notice::Tells {
                sender: "alice",
                text: "hey there"
            }
            .to_string(),
            "alice tells you: hey there"
        );
        assert_eq!(
            Notice::NotLoggedOn { recipient: "ghost" }.to_string(),
            "ghost is not logged on"
        );
    }

    #[test]
    fn test_text_is_not_escaped() {
        let notice = Notice::Says {
            sender: "bob",
            text: "50% off: {braces} stay",
        };
        assert_eq!(notice.to_string(), "bob says: 50% off: {braces} stay");
    }
}
