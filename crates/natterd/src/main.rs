//! natter server - chat session registry and mailbox delivery
//!
//! # Usage
//!
//! ```bash
//! # Start the server (foreground)
//! natterd start
//!
//! # Start the server (background/daemonized)
//! natterd start -d
//!
//! # Listen on another port
//! natterd start --port 4000
//!
//! # Stop the server
//! natterd stop
//!
//! # Check server status
//! natterd status
//!
//! # Allow remote shutdown
//! NATTER_SHUTDOWN_SECRET=hunter2 natterd start
//!
//! # Enable debug logging
//! RUST_LOG=natterd=debug natterd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, same as an authorized remote shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use natterd::config::ServerConfig;
use natterd::registry::{spawn_registry, RegistrySettings};
use natterd::server::ChatServer;

/// natter server - multi-user chat session registry
#[derive(Parser, Debug)]
#[command(name = "natterd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on, keeping the configured host
        #[arg(short, long)]
        port: Option<u16>,

        /// Full listen address, e.g. 127.0.0.1:3410
        #[arg(short, long, conflicts_with = "port")]
        listen: Option<String>,
    },
    /// Stop the running server
    Stop,
    /// Show server status
    Status,
}

/// Options for a server run, resolved from the command line.
#[derive(Debug, Default)]
struct StartOptions {
    config: Option<PathBuf>,
    port: Option<u16>,
    listen: Option<String>,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("natter")
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("natterd.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    state_dir().join("natterd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks that the process exists.
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Checks if the server is already running, clearing a stale PID file.
fn is_server_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the server process.
fn stop_server(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let raw = i32::try_from(pid).context("PID out of range")?;
        let result = unsafe { libc::kill(raw, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {}", pid);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
        port: None,
        listen: None,
    });

    match command {
        Command::Start {
            daemon,
            config,
            port,
            listen,
        } => {
            if let Some(pid) = is_server_running() {
                eprintln!("Server is already running (PID {})", pid);
                eprintln!("Use 'natterd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting tokio runtime
                daemonize()?;
            }

            write_pid()?;

            let result = run_server(StartOptions {
                config,
                port,
                listen,
            });

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_server_running() {
                println!("Stopping server (PID {})...", pid);
                stop_server(pid)?;

                // Wait for process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Server stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Server did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Server is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_server_running() {
                println!("Server is running (PID {})", pid);
                Ok(())
            } else {
                println!("Server is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Runs the server (async entry point).
#[tokio::main]
async fn run_server(options: StartOptions) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("natterd=info".parse()?)
                .add_directive("natter_core=info".parse()?)
                .add_directive("natter_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "natter server starting"
    );

    let mut config =
        ServerConfig::load(options.config.as_deref()).context("Failed to load configuration")?;
    if let Some(listen) = options.listen {
        config.listen = listen;
    }
    if let Some(port) = options.port {
        config.set_port(port);
    }
    info!(config = ?config, "Configuration loaded");

    if config.shutdown_secret.is_none() {
        warn!("No shutdown secret configured, remote shutdown is disabled");
    }

    // Cancelled by signals and by an authorized remote shutdown alike
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    error!(error = %e, "Error waiting for shutdown signal");
                }
                info!("Shutdown signal received");
                shutdown_token.cancel();
            }
            _ = shutdown_token.cancelled() => {}
        }
    });

    let registry = spawn_registry(RegistrySettings::from(&config), cancel_token.clone());
    info!(max_sessions = config.max_sessions, "Session registry started");

    let server = ChatServer::bind(&config.listen, registry, cancel_token)
        .await?
        .with_idle_timeout(config.idle_timeout());

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("natter server stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
