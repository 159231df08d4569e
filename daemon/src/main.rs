//! Skyway Daemon - WebSocket Session Server
//!
//! This is the main entry point for the Skyway daemon, which exposes one
//! conversation engine per connected WebSocket client. Browsers, scripts,
//! and other remote clients connect here instead of embedding the engine.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8765)
//! skyway-daemon
//!
//! # Custom bind address
//! skyway-daemon --bind 0.0.0.0:9000
//!
//! # With config file
//! skyway-daemon --config /etc/skyway/skyway.toml
//!
//! # Daemonize (run in background)
//! skyway-daemon --daemonize
//!
//! # Verbose logging
//! RUST_LOG=debug skyway-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown, saving live sessions

mod protocol;
mod server;
mod store;

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use skyway_engine::{default_config_path, load_config_from_path};

use server::DaemonServer;
use store::SessionStore;

/// Skyway Daemon - WebSocket session server for disposable-account chat
#[derive(Parser, Debug)]
#[command(name = "skyway-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on for WebSocket connections
    #[arg(
        short = 'b',
        long,
        env = "SKYWAY_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:8765"
    )]
    bind: String,

    /// Configuration file path
    #[arg(short = 'c', long, env = "SKYWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for saved session files
    #[arg(long, env = "SKYWAY_SESSIONS_DIR", value_name = "DIR")]
    sessions_dir: Option<PathBuf>,

    /// Run as daemon (fork to background)
    #[arg(short = 'd', long)]
    daemonize: bool,

    /// PID file path (for daemon mode)
    #[arg(long, env = "SKYWAY_PID_FILE", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SKYWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Get the default sessions directory
///
/// Uses XDG_DATA_HOME if available, otherwise /tmp/skyway-$UID/
fn default_sessions_dir() -> PathBuf {
    if let Ok(data_dir) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(data_dir).join("skyway").join("sessions")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/skyway-{uid}/sessions"))
    }
}

/// Get the default PID file path
fn default_pid_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("skyway")
            .join("skyway-daemon.pid")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/skyway-{uid}/skyway-daemon.pid"))
    }
}

/// Write PID file
fn write_pid_file(path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create PID directory: {parent:?}"))?;
    }

    let pid = std::process::id();
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create PID file: {path:?}"))?;
    writeln!(file, "{pid}")?;

    info!(pid = pid, path = ?path, "PID file created");
    Ok(())
}

/// Remove PID file
fn remove_pid_file(path: &PathBuf) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = ?path, "Failed to remove PID file");
        } else {
            info!(path = ?path, "PID file removed");
        }
    }
}

/// Check if another daemon is running by checking PID file
fn check_existing_daemon(pid_path: &PathBuf) -> Result<()> {
    if !pid_path.exists() {
        return Ok(());
    }

    let pid_str = fs::read_to_string(pid_path)
        .with_context(|| format!("Failed to read PID file: {pid_path:?}"))?;

    let pid: i32 = pid_str
        .trim()
        .parse()
        .with_context(|| "Invalid PID in file")?;

    // Check if process is running (signal 0 just checks existence)
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        anyhow::bail!(
            "Another skyway-daemon is already running (PID: {pid}). \
             Stop it first or remove {pid_path:?} if it's stale."
        );
    }

    // Process not running, PID file is stale
    warn!(pid = pid, "Removing stale PID file");
    fs::remove_file(pid_path)?;
    Ok(())
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("skyway_daemon={level},skyway_engine={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Daemonize the process (fork to background)
fn daemonize() -> Result<()> {
    use nix::unistd::{fork, setsid, ForkResult};

    // First fork
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            // Parent exits
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {
            // Child continues
        }
        Err(e) => {
            anyhow::bail!("First fork failed: {e}");
        }
    }

    // Create new session
    setsid().context("setsid failed")?;

    // Second fork (prevent acquiring controlling terminal)
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {
            // Grandchild continues as daemon
        }
        Err(e) => {
            anyhow::bail!("Second fork failed: {e}");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level)?;

    info!("Skyway Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    // Resolve paths
    let sessions_dir = args.sessions_dir.unwrap_or_else(default_sessions_dir);
    let pid_path = args.pid_file.unwrap_or_else(default_pid_path);

    info!(bind = %args.bind, "Bind address");
    info!(sessions_dir = ?sessions_dir, "Sessions directory");
    info!(pid_path = ?pid_path, "PID file path");

    if let Some(ref config_path) = args.config {
        info!(config_path = ?config_path, "Config file");
    }

    // Check for existing daemon
    check_existing_daemon(&pid_path)?;

    // Daemonize if requested
    if args.daemonize {
        info!("Daemonizing...");
        daemonize()?;
        // After daemonizing, PID changes
        info!("Daemonized, new PID: {}", std::process::id());
    }

    // Write PID file
    write_pid_file(&pid_path)?;

    // Load engine configuration
    let config = load_config_from_path(args.config.or_else(default_config_path))
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(host = %config.host, "Engine configured");

    // Setup signal handlers
    let shutdown = Arc::new(AtomicBool::new(false));

    let shutdown_clone = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating shutdown");
            }
        }
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    // Create and run daemon server
    let mut server = DaemonServer::new(args.bind, config, SessionStore::new(sessions_dir));

    let result = server.run(shutdown).await;

    // Cleanup
    info!("Shutting down...");
    remove_pid_file(&pid_path);

    match result {
        Ok(()) => {
            info!("Skyway daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
