//! Registry actor - owns all session state and processes commands.
//!
//! The RegistryActor is the single owner of session state in the system.
//! It receives commands via an mpsc channel and answers each on its
//! oneshot responder.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Responder send failures never lose mailbox contents

use std::ops::ControlFlow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use natter_core::{Notice, Session, SessionName};

use super::commands::{Delivery, RegistryCommand, RegistryError, RemovalReason, SessionTicket};
use crate::config::ServerConfig;

// ============================================================================
// Settings
// ============================================================================

/// The slice of server configuration the registry needs.
#[derive(Clone)]
pub struct RegistrySettings {
    /// Maximum number of sessions the registry can hold.
    pub max_sessions: usize,

    /// Sessions idle for longer than this are logged off; `None` never
    /// reaps.
    pub stale_after: Option<Duration>,

    /// Credential authorizing shutdown; `None` rejects every attempt.
    pub shutdown_secret: Option<String>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for RegistrySettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            stale_after: config.stale_after(),
            shutdown_secret: config.shutdown_secret.clone(),
        }
    }
}

// ============================================================================
// Registry Actor
// ============================================================================

/// A session plus the runtime state attached to it.
struct SessionEntry {
    session: Session,

    /// The registration this entry belongs to.
    ticket: SessionTicket,

    /// A long-poll waiting for this session's next message.
    waiter: Option<Delivery>,
}

impl SessionEntry {
    fn new(session: Session, ticket: SessionTicket) -> Self {
        Self {
            session,
            ticket,
            waiter: None,
        }
    }

    fn name(&self) -> &SessionName {
        self.session.name()
    }

    /// Appends a notice and wakes a parked long-poll, if any.
    fn deliver(&mut self, notice: &Notice<'_>) {
        self.session.deliver(notice);
        self.flush_waiter();
    }

    /// Hands the whole mailbox to the parked long-poll.
    ///
    /// If the poller already gave up, the batch goes back into the mailbox.
    fn flush_waiter(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            let batch = self.session.mailbox_mut().drain();
            if let Err(Ok(batch)) = waiter.send(Ok(batch)) {
                debug!(name = %self.name(), "Long-poll abandoned, requeueing");
                self.session.mailbox_mut().requeue(batch);
            }
        }
    }

    /// Whether a live long-poll is parked on this session.
    fn is_polling(&self) -> bool {
        self.waiter.as_ref().is_some_and(|w| !w.is_closed())
    }
}

/// The registry actor - owns all session state.
///
/// Implements the actor pattern: receives commands via mpsc channel and
/// processes them sequentially. Because exactly one task touches the
/// session table, every command is atomic and all mailbox appends follow
/// the single order in which commands were received.
///
/// # Ownership
///
/// The actor owns:
/// - `sessions`: every session in registration order
/// - the parked long-poll responders, one per session at most
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Sessions in registration order. Lookups are linear, bounded by
    /// `max_sessions`.
    sessions: Vec<SessionEntry>,

    settings: RegistrySettings,

    /// Ticket handed to the next successful registration.
    next_ticket: u64,

    /// Cancelled by an authorized shutdown; cancelling it externally also
    /// stops the actor.
    shutdown: CancellationToken,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `settings` - Limits and the shutdown secret
    /// * `shutdown` - Token cancelled when the registry shuts down
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        settings: RegistrySettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            sessions: Vec::new(),
            settings,
            next_ticket: 1,
            shutdown,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until an authorized shutdown, until the shutdown
    /// token is cancelled elsewhere, or until every sender is dropped.
    /// Commands still queued at that point are dropped unanswered, which
    /// callers observe as `RegistryError::Closed`.
    pub async fn run(mut self) {
        info!(
            max_sessions = self.settings.max_sessions,
            stale_after_secs = self.settings.stale_after.map(|d| d.as_secs()),
            remote_shutdown = self.settings.shutdown_secret.is_some(),
            "Registry actor starting"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("Shutdown token cancelled");
                    break;
                }

                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle_command(cmd).is_break() {
                        break;
                    }
                }
            }
        }

        self.receiver.close();
        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) -> ControlFlow<()> {
        let now = Utc::now();

        match cmd {
            RegistryCommand::Register { name, respond_to } => {
                let result = self.handle_register(name, now);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::List {
                requester,
                respond_to,
            } => {
                let names = self.handle_list(&requester, now);
                let _ = respond_to.send(names);
            }
            RegistryCommand::CheckMessages {
                name,
                park,
                respond_to,
            } => {
                self.handle_check_messages(&name, park, respond_to, now);
            }
            RegistryCommand::Say {
                sender,
                text,
                respond_to,
            } => {
                self.handle_say(&sender, &text, now);
                let _ = respond_to.send(Ok(()));
            }
            RegistryCommand::Tell {
                sender,
                recipient,
                text,
                respond_to,
            } => {
                self.handle_tell(&sender, &recipient, &text, now);
                let _ = respond_to.send(Ok(()));
            }
            RegistryCommand::Logout {
                name,
                owner,
                reason,
                respond_to,
            } => {
                let result = self.handle_logout(&name, owner, reason, now);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Shutdown {
                requester,
                secret,
                respond_to,
            } => {
                let result = self.handle_shutdown(&requester, &secret);
                let authorized = result.is_ok();
                let _ = respond_to.send(result);
                if authorized {
                    return ControlFlow::Break(());
                }
            }
            RegistryCommand::ReapIdle => {
                self.handle_reap_idle(now);
            }
        }

        ControlFlow::Continue(())
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(
        &mut self,
        name: SessionName,
        now: DateTime<Utc>,
    ) -> Result<SessionTicket, RegistryError> {
        if self.position(name.as_str()).is_some() {
            warn!(name = %name, "Registration rejected: name already taken");
            return Err(RegistryError::NameConflict(name.into_inner()));
        }

        if self.sessions.len() >= self.settings.max_sessions {
            warn!(
                name = %name,
                current = self.sessions.len(),
                max = self.settings.max_sessions,
                "Registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull {
                max: self.settings.max_sessions,
            });
        }

        let ticket = SessionTicket::new(self.next_ticket);
        self.next_ticket += 1;

        info!(name = %name, ticket = ?ticket, "Session logged on");

        // Existing sessions only; the newcomer never sees its own join notice.
        let notice = Notice::LoggedOn {
            name: name.as_str(),
        };
        for entry in &mut self.sessions {
            entry.deliver(&notice);
        }

        self.sessions.push(SessionEntry::new(Session::new(name, now), ticket));
        Ok(ticket)
    }

    fn handle_list(&mut self, requester: &str, now: DateTime<Utc>) -> Vec<String> {
        info!(requester = %requester, "User list requested");
        self.touch(requester, now);

        self.sessions
            .iter()
            .map(|entry| entry.name().to_string())
            .collect()
    }

    fn handle_check_messages(
        &mut self,
        name: &str,
        park: bool,
        respond_to: Delivery,
        now: DateTime<Utc>,
    ) {
        let Some(entry) = self.entry_mut(name) else {
            debug!(name = %name, "Mailbox check for unknown session");
            let _ = respond_to.send(Ok(Vec::new()));
            return;
        };

        entry.session.touch(now);

        let batch = entry.session.mailbox_mut().drain();
        if !batch.is_empty() || !park {
            if let Err(Ok(batch)) = respond_to.send(Ok(batch)) {
                entry.session.mailbox_mut().requeue(batch);
            }
            return;
        }

        // Newest poll wins; the superseded one resolves empty.
        if let Some(previous) = entry.waiter.replace(respond_to) {
            let _ = previous.send(Ok(Vec::new()));
        }
    }

    fn handle_say(&mut self, sender: &str, text: &str, now: DateTime<Utc>) {
        info!(sender = %sender, text = %text, "Broadcast");
        self.touch(sender, now);

        let notice = Notice::Says { sender, text };
        for entry in &mut self.sessions {
            entry.deliver(&notice);
        }
    }

    fn handle_tell(&mut self, sender: &str, recipient: &str, text: &str, now: DateTime<Utc>) {
        self.touch(sender, now);

        if let Some(entry) = self.entry_mut(recipient) {
            info!(sender = %sender, recipient = %recipient, text = %text, "Direct message");
            entry.deliver(&Notice::Tells { sender, text });
            return;
        }

        info!(
            sender = %sender,
            recipient = %recipient,
            "Direct message to a session that is not logged on"
        );
        match self.entry_mut(sender) {
            Some(entry) => entry.deliver(&Notice::NotLoggedOn { recipient }),
            None => debug!(sender = %sender, "Sender not logged on either, nothing delivered"),
        }
    }

    fn handle_logout(
        &mut self,
        name: &str,
        owner: Option<SessionTicket>,
        reason: RemovalReason,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let Some(index) = self.position(name) else {
            warn!(name = %name, reason = %reason, "Logout for a session that is not logged on");
            return Err(RegistryError::SessionNotFound(name.to_string()));
        };

        if let Some(owner) = owner {
            let current = self.sessions.get(index).map(|entry| entry.ticket);
            if current != Some(owner) {
                debug!(
                    name = %name,
                    reason = %reason,
                    owner = ?owner,
                    current = ?current,
                    "Name now belongs to another registration, keeping it"
                );
                return Err(RegistryError::SessionNotFound(name.to_string()));
            }
        }

        let mut removed = self.sessions.remove(index);

        // A parked long-poll gets whatever is left rather than hanging.
        if let Some(waiter) = removed.waiter.take() {
            let _ = waiter.send(Ok(removed.session.mailbox_mut().drain()));
        }

        info!(
            name = %name,
            reason = %reason,
            online_secs = removed.session.online_for(now).num_seconds(),
            undelivered = removed.session.mailbox().len(),
            "Session logged off"
        );

        let notice = Notice::LoggedOff { name };
        for entry in &mut self.sessions {
            entry.deliver(&notice);
        }

        Ok(())
    }

    fn handle_shutdown(&mut self, requester: &str, secret: &str) -> Result<(), RegistryError> {
        let authorized = self
            .settings
            .shutdown_secret
            .as_deref()
            .is_some_and(|expected| secrets_match(expected.as_bytes(), secret.as_bytes()));

        if !authorized {
            warn!(
                requester = %requester,
                remote_shutdown = self.settings.shutdown_secret.is_some(),
                "Shutdown attempt rejected: incorrect secret"
            );
            return Err(RegistryError::Unauthorized {
                requester: requester.to_string(),
            });
        }

        info!(
            requester = %requester,
            sessions = self.sessions.len(),
            "Server is being shut down"
        );
        self.shutdown.cancel();
        Ok(())
    }

    fn handle_reap_idle(&mut self, now: DateTime<Utc>) {
        let Some(stale_after) = self.settings.stale_after else {
            return;
        };
        let Ok(threshold) = chrono::Duration::from_std(stale_after) else {
            return;
        };

        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !entry.is_polling() && entry.session.idle_for(now) > threshold)
            .map(|entry| entry.name().to_string())
            .collect();

        if stale.is_empty() {
            return;
        }

        debug!(count = stale.len(), "Reaping idle sessions");
        for name in stale {
            let _ = self.handle_logout(&name, None, RemovalReason::Idle, now);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn position(&self, name: &str) -> Option<usize> {
        self.sessions.iter().position(|entry| entry.name() == name)
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut SessionEntry> {
        self.sessions.iter_mut().find(|entry| entry.name() == name)
    }

    fn touch(&mut self, name: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.entry_mut(name) {
            entry.session.touch(now);
        }
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, name: &str) -> Vec<String> {
        self.sessions
            .iter()
            .find(|entry| entry.name() == name)
            .map(|entry| {
                let mut mailbox = entry.session.mailbox().clone();
                mailbox.drain()
            })
            .unwrap_or_default()
    }
}

/// Constant-time comparison so response timing does not leak the secret.
fn secrets_match(expected: &[u8], given: &[u8]) -> bool {
    if expected.len() != given.len() {
        return false;
    }
    expected
        .iter()
        .zip(given)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
