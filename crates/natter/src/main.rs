//! natter - terminal chat client
//!
//! # Usage
//!
//! ```text
//! natter alice                  # server at localhost:3410
//! natter alice :4000            # localhost:4000
//! natter alice chat.example.org # chat.example.org:3410
//! natter ""                     # logs on as Guest
//! ```
//!
//! Logs go to stderr at `warn` unless `RUST_LOG` says otherwise, so chat
//! output on stdout stays clean.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use natter::input::HELP;
use natter::{normalize_address, parse_line, Action, ChatClient};
use natter_core::DEFAULT_NAME;
use natter_protocol::ErrorCode;

/// How long each delivery long-poll may wait on the server.
const DELIVERY_WAIT: Duration = Duration::from_secs(25);

/// Heartbeat period for the command connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// CLI Arguments
// ============================================================================

/// natter - chat with everyone logged on to a natter server
#[derive(Parser, Debug)]
#[command(name = "natter", version, about)]
struct Args {
    /// Name to log on as (empty for Guest)
    name: String,

    /// Server address: host, :port or host:port (default localhost:3410)
    address: Option<String>,
}

type SharedClient = Arc<Mutex<ChatClient>>;

/// What the terminal loop does after an action.
enum Flow {
    Continue,
    Quit,
    ServerStopped,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    let name = match args.name.trim() {
        "" => DEFAULT_NAME.to_string(),
        name => name.to_string(),
    };
    let address = normalize_address(args.address.as_deref());

    let mut commands = ChatClient::connect(&address, &name)
        .await
        .with_context(|| format!("Error connecting to server at {address}"))?;
    commands.register().await.context("Error registering")?;

    println!("Welcome {name}");
    print_users(&commands.list().await.context("Error listing users")?);

    let delivery = ChatClient::connect(&address, &name)
        .await
        .with_context(|| format!("Error connecting to server at {address}"))?;

    let commands: SharedClient = Arc::new(Mutex::new(commands));
    let cancel_token = CancellationToken::new();

    let mut delivery_task = tokio::spawn(delivery_loop(delivery, cancel_token.clone()));
    let mut heartbeat_task = tokio::spawn(heartbeat_loop(commands.clone(), cancel_token.clone()));

    let result = terminal_loop(&commands, &mut delivery_task, &mut heartbeat_task).await;

    cancel_token.cancel();
    delivery_task.abort();
    heartbeat_task.abort();

    result
}

/// Logs to stderr, quiet by default.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Terminal Loop
// ============================================================================

/// Reads commands until quit, end of input, or a background task fails.
async fn terminal_loop(
    commands: &SharedClient,
    delivery_task: &mut JoinHandle<natter::Result<()>>,
    heartbeat_task: &mut JoinHandle<natter::Result<()>>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            result = &mut *delivery_task => {
                return Err(background_failure("delivery", result));
            }
            result = &mut *heartbeat_task => {
                return Err(background_failure("heartbeat", result));
            }
            line = lines.next_line() => {
                let line = line.context("Error reading standard input")?;
                let Some(line) = line else {
                    debug!("End of input");
                    return log_out(commands).await;
                };

                match handle_action(parse_line(&line), commands).await? {
                    Flow::Continue => {}
                    Flow::Quit => return log_out(commands).await,
                    Flow::ServerStopped => return Ok(()),
                }
            }
        }
    }
}

/// Runs one action. Requests the server refuses are reported and the loop
/// goes on; transport failures end the client.
async fn handle_action(action: Action, commands: &SharedClient) -> Result<Flow> {
    let mut client = commands.lock().await;

    let outcome = match action {
        Action::None => Ok(()),
        Action::List => client.list().await.map(|names| print_users(&names)),
        Action::Say(text) => client.say(&text).await,
        Action::Tell { recipient, text } => client.tell(&recipient, &text).await,
        Action::Help => {
            println!("{HELP}");
            Ok(())
        }
        Action::Quit => return Ok(Flow::Quit),
        Action::Shutdown(secret) => match client.shutdown(&secret).await {
            Ok(()) => {
                println!("Server is now shutdown");
                return Ok(Flow::ServerStopped);
            }
            Err(e) if e.code() == Some(ErrorCode::Unauthorized) => {
                println!("Shutdown refused: incorrect password");
                Ok(())
            }
            Err(e) => Err(e),
        },
        Action::Usage(usage) => {
            println!("Usage: {usage}");
            Ok(())
        }
        Action::Unknown(command) => {
            println!("Unknown command '{command}', type help for a list of commands");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(Flow::Continue),
        Err(e) if !e.is_transport() => {
            println!("Error: {e}");
            Ok(Flow::Continue)
        }
        Err(e) => Err(anyhow!(e).context("Lost connection to server")),
    }
}

async fn log_out(commands: &SharedClient) -> Result<()> {
    let mut client = commands.lock().await;
    client.logout().await.context("Error logging out")?;
    println!("You are now logged out");
    Ok(())
}

fn print_users(names: &[String]) {
    println!("Users currently logged on");
    for name in names {
        println!("  {name}");
    }
    println!("Total users: {}", names.len());
}

fn background_failure(
    task: &str,
    result: std::result::Result<natter::Result<()>, tokio::task::JoinError>,
) -> anyhow::Error {
    match result {
        Ok(Ok(())) => anyhow!("{task} task stopped unexpectedly"),
        Ok(Err(e)) => anyhow!(e).context("Lost connection to server"),
        Err(e) => anyhow!("{task} task failed: {e}"),
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

/// Long-polls the mailbox and prints every message, oldest first.
async fn delivery_loop(mut client: ChatClient, cancel_token: CancellationToken) -> natter::Result<()> {
    info!(client_id = %client.client_id(), "Delivery loop started");

    loop {
        let batch = tokio::select! {
            _ = cancel_token.cancelled() => None,
            batch = client.check_messages(Some(DELIVERY_WAIT)) => Some(batch),
        };

        let Some(batch) = batch else {
            client.disconnect().await;
            return Ok(());
        };

        // The server only refuses a mailbox check once it is shutting down.
        for message in batch? {
            println!("{message}");
        }
    }
}

/// Pings over the command connection so it never idles out.
async fn heartbeat_loop(commands: SharedClient, cancel_token: CancellationToken) -> natter::Result<()> {
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                commands.lock().await.ping().await?;
            }
        }
    }
}
