//! Per-session FIFO of undelivered messages.

use std::collections::VecDeque;

/// Pending messages for one session, in delivery order.
///
/// Other sessions only ever append; the owner empties it with [`drain`].
/// Nothing is dropped except by a drain.
///
/// [`drain`]: Mailbox::drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mailbox {
    pending: VecDeque<String>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the back.
    pub fn push(&mut self, message: impl Into<String>) {
        self.pending.push_back(message.into());
    }

    /// Removes and returns every pending message, oldest first.
    #[must_use]
    pub fn drain(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }

    /// Puts a previously drained batch back in front of anything that
    /// arrived since, preserving the original order.
    pub fn requeue(&mut self, batch: Vec<String>) {
        for message in batch.into_iter().rev() {
            self.pending.push_front(message);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_in_order_and_empties() {
        let mut mailbox = Mailbox::new();
        mailbox.push("one");
        mailbox.push("two");
        mailbox.push("three");

        assert_eq!(mailbox.len(), 3);
        assert_eq!(mailbox.drain(), vec!["one", "two", "three"]);
        assert!(mailbox.is_empty());
        assert!(mailbox.drain().is_empty());
    }

    #[test]
    fn test_requeue_goes_before_newer_messages() {
        let mut mailbox = Mailbox::new();
        mailbox.push("a");
        mailbox.push("b");
        let batch = mailbox.drain();

        mailbox.push("c");
        mailbox.requeue(batch);

        assert_eq!(mailbox.drain(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_requeue_empty_batch_is_noop() {
        let mut mailbox = Mailbox::new();
        mailbox.push("x");
        mailbox.requeue(Vec::new());
        assert_eq!(mailbox.drain(), vec!["x"]);
    }
}
