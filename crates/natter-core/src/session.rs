//! Session domain entity.

use crate::{Mailbox, Notice, SessionName};
use chrono::{DateTime, Duration, Utc};
use tracing::trace;

/// One logged-in participant: a unique name plus a mailbox.
///
/// Pure domain data. Anything tied to the async runtime (such as a parked
/// long-poll) lives with the registry, not here.
#[derive(Debug, Clone)]
pub struct Session {
    name: SessionName,
    mailbox: Mailbox,
    joined_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl Session {
    /// Creates a session with an empty mailbox, joined at `now`.
    pub fn new(name: SessionName, now: DateTime<Utc>) -> Self {
        Self {
            name,
            mailbox: Mailbox::new(),
            joined_at: now,
            last_seen: now,
        }
    }

    pub fn name(&self) -> &SessionName {
        &self.name
    }

    /// Records activity from the owning client.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
    }

    /// Time since the owning client was last heard from.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_seen)
    }

    /// Time since registration.
    pub fn online_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.joined_at)
    }

    /// Renders a notice into this session's mailbox.
    pub fn deliver(&mut self, notice: &Notice<'_>) {
        trace!(to = %self.name, notice = %notice, "Appending to mailbox");
        self.mailbox.push(notice.to_string());
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }
}
