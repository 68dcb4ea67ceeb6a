//! Session registry using Actor pattern.
//!
//! The registry is the single owner of every session and mailbox.
//! It receives commands via a tokio mpsc channel and processes them one at
//! a time, so each operation is atomic and every mailbox sees appends in the
//! same order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ConnectionHandlers│────▶│  RegistryActor  │────▶│  oneshot replies │
//! └──────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │
//!         │   RegistryCommand     │   Vec<SessionEntry>
//!         │   (mpsc channel)      │   (registration order)
//!         ▼                       ▼
//!    register/say/tell       sessions, mailboxes,
//!    check/logout/shutdown   parked long-polls
//! ```
//!
//! # Delivery
//!
//! Delivery is pull-based with a bounded long-poll: a drain that finds the
//! mailbox empty may park for up to [`MAX_POLL_WAIT`] and is answered the
//! moment the next message for that session is appended.
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, RegistrySettings};
pub use commands::{RegistryCommand, RegistryError, RemovalReason, SessionTicket};
pub use handle::{RegistryHandle, MAX_POLL_WAIT};

/// Channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Cleanup interval in seconds
const CLEANUP_INTERVAL_SECS: u64 = 30;

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates the command channel
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns a background idle-session cleanup task, if
///    `settings.stale_after` is set
/// 4. Returns a RegistryHandle for client use
///
/// `shutdown` is cancelled by an authorized remote shutdown; cancelling it
/// from elsewhere (e.g. a signal handler) stops the registry too.
///
/// # Example
///
/// ```no_run
/// use natterd::registry::{spawn_registry, RegistrySettings};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(RegistrySettings::default(), CancellationToken::new());
///
///     let _ = handle.register("alice").await;
///     let names = handle.list("alice").await;
/// }
/// ```
pub fn spawn_registry(settings: RegistrySettings, shutdown: CancellationToken) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let reaping = settings.stale_after.is_some();
    let actor = RegistryActor::new(cmd_rx, settings, shutdown.clone());
    tokio::spawn(actor.run());

    let handle = RegistryHandle::new(cmd_tx);

    if reaping {
        spawn_cleanup_task(handle.clone(), shutdown);
    }

    handle
}

/// Spawn a background task that triggers periodic idle-session cleanup.
fn spawn_cleanup_task(registry: RegistryHandle, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Cleanup task stopping: shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    if registry.reap_idle().await.is_err() {
                        debug!("Cleanup task stopping: registry channel closed");
                        break;
                    }
                }
            }
        }
    });
}
