//! Skyway CLI - Interactive Chat over Disposable Accounts
//!
//! Line-oriented chat client for the skyway engine. Replies stream to the
//! terminal as they arrive; slash commands manage the session.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults
//! skyway
//!
//! # With a proxy list
//! skyway --proxies proxies.txt
//!
//! # Restore a saved session
//! skyway --session skyway-session.json
//!
//! # Pin the account budget and disable rotation
//! skyway --max-messages 3 --no-auto-rotate
//!
//! # Verbose logging
//! RUST_LOG=debug skyway
//! ```
//!
//! # Commands
//!
//! Type `/help` at the prompt for the full command list.

mod repl;
mod session;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use skyway_engine::{
    config::{default_config_path, load_config_from_path, ConfigOverrides},
    events::EventSink,
    transport::HttpTransport,
    ConversationEngine,
};

/// Skyway - streaming chat client over disposable accounts
#[derive(Parser, Debug)]
#[command(name = "skyway")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "SKYWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the service host
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Messages per account before rotation
    #[arg(short = 'm', long, value_name = "N")]
    max_messages: Option<u32>,

    /// Disable automatic account rotation
    #[arg(long)]
    no_auto_rotate: bool,

    /// Proxy list file (host:port or host:port:user:pass per line)
    #[arg(short = 'p', long, env = "SKYWAY_PROXIES", value_name = "FILE")]
    proxies: Option<PathBuf>,

    /// Session file to restore at startup
    #[arg(short = 's', long, value_name = "FILE")]
    session: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SKYWAY_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("skyway={level},skyway_engine={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(host) = args.host.clone() {
        overrides = overrides.with_host(host);
    }
    if let Some(max) = args.max_messages {
        overrides = overrides.with_max_messages(max);
    }
    if args.no_auto_rotate {
        overrides = overrides.with_auto_rotate(false);
    }
    overrides.apply(&mut config);
    config.validate()?;

    info!(host = %config.host, source = %config.source(), "Skyway starting");

    let transport = Arc::new(HttpTransport::from_config(&config));
    let (events, rx) = EventSink::channel();
    let mut engine = ConversationEngine::with_events(transport, config, events);

    if let Some(ref path) = args.proxies {
        let list = fs::read_to_string(path)
            .with_context(|| format!("Failed to read proxy list: {}", path.display()))?;
        let count = engine.load_proxies(&list);
        println!("Loaded {count} proxies from {}", path.display());
    }

    if let Some(ref path) = args.session {
        let saved = session::load(path)?;
        println!(
            "Restored {} messages (saved {})",
            saved.history.len(),
            saved.timestamp.format("%Y-%m-%d %H:%M UTC")
        );
        engine.load_history(saved.history, saved.message_count);
    }

    repl::run(engine, rx).await
}
