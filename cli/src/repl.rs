//! Interactive Command Loop
//!
//! Reads lines from stdin; lines starting with `/` are commands, anything
//! else is sent as a chat message. Engine events print between prompts, and
//! reply deltas stream to the terminal while a send is in flight.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use skyway_engine::{ChatTransport, ConversationEngine, EngineEvent};

use crate::session;

const DEFAULT_SESSION_FILE: &str = "skyway-session.json";
const DEFAULT_EXPORT_FILE: &str = "skyway-chat.md";

const HELP: &str = "\
commands:
  /help             show this help
  /clear            clear history and reset the account counter
  /save [file]      save the session (default skyway-session.json)
  /load [file]      restore a saved session
  /history          print the conversation
  /status           print engine state
  /rotate           force rotation to a fresh account
  /autorotate on|off  toggle automatic rotation
  /setmax <n>       messages per account before rotation
  /proxies [file]   show pool counters, or load a proxy list
  /export [file]    export the conversation as markdown
  /exit             quit";

/// A parsed slash command
#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    Help,
    Clear,
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    History,
    Status,
    Rotate,
    AutoRotate(bool),
    SetMax(u32),
    Proxies(Option<PathBuf>),
    Export(Option<PathBuf>),
    Exit,
}

impl Command {
    /// Parse an input line.
    ///
    /// Returns `None` for plain chat input, `Some(Err(_))` with a usage
    /// message for a malformed or unknown command.
    fn parse(line: &str) -> Option<Result<Self, String>> {
        if !line.starts_with('/') {
            return None;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or(line);
        let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());

        let command = match name {
            "/help" => Self::Help,
            "/clear" => Self::Clear,
            "/save" => Self::Save(arg.map(PathBuf::from)),
            "/load" => Self::Load(arg.map(PathBuf::from)),
            "/history" => Self::History,
            "/status" => Self::Status,
            "/rotate" => Self::Rotate,
            "/autorotate" => match arg {
                Some("on") => Self::AutoRotate(true),
                Some("off") => Self::AutoRotate(false),
                _ => return Some(Err("usage: /autorotate on|off".to_string())),
            },
            "/setmax" => match arg.and_then(|arg| arg.parse().ok()) {
                Some(n) => Self::SetMax(n),
                None => return Some(Err("usage: /setmax <n>".to_string())),
            },
            "/proxies" => Self::Proxies(arg.map(PathBuf::from)),
            "/export" => Self::Export(arg.map(PathBuf::from)),
            "/exit" | "/quit" => Self::Exit,
            other => return Some(Err(format!("unknown command {other}; try /help"))),
        };
        Some(Ok(command))
    }
}

/// Run the interactive loop until `/exit` or EOF
pub async fn run<T: ChatTransport>(
    mut engine: ConversationEngine<T>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) -> Result<()> {
    println!("skyway - streaming chat (type /help for commands)");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        drain(&mut events);
        print!("> ");
        io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Some(Ok(Command::Exit)) => break,
            Some(Ok(command)) => handle(&mut engine, command).await,
            Some(Err(usage)) => println!("{usage}"),
            None => send(&mut engine, &mut events, line).await,
        }
    }

    println!("bye");
    Ok(())
}

/// Send a chat line, printing events live while the reply streams in
async fn send<T: ChatTransport>(
    engine: &mut ConversationEngine<T>,
    events: &mut mpsc::UnboundedReceiver<EngineEvent>,
    line: &str,
) {
    let send = engine.send_message(line);
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            Some(event) = events.recv() => print_event(&event),
        }
    };
    drain(events);

    if let Err(error) = result {
        eprintln!("error: {error}");
    }
}

/// Execute one slash command; failures print, they never end the loop
async fn handle<T: ChatTransport>(engine: &mut ConversationEngine<T>, command: Command) {
    match command {
        Command::Help => println!("{HELP}"),
        Command::Clear => {
            let dropped = engine.history().len();
            engine.clear_history();
            println!("cleared {dropped} messages");
        }
        Command::Save(path) => {
            let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
            match session::save(&path, engine.history(), engine.message_count()) {
                Ok(()) => println!(
                    "saved {} messages to {}",
                    engine.history().len(),
                    path.display()
                ),
                Err(error) => eprintln!("error: {error:#}"),
            }
        }
        Command::Load(path) => {
            let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
            match session::load(&path) {
                Ok(saved) => {
                    let count = saved.history.len();
                    engine.load_history(saved.history, saved.message_count);
                    println!("restored {count} messages from {}", path.display());
                }
                Err(error) => eprintln!("error: {error:#}"),
            }
        }
        Command::History => {
            if engine.history().is_empty() {
                println!("(no messages)");
            }
            for message in engine.history() {
                println!("[{}] {}", role_label(message), message.text());
            }
        }
        Command::Status => print_status(engine),
        Command::Rotate => {
            if let Err(error) = engine.rotate_account().await {
                eprintln!("error: {error}");
            }
        }
        Command::AutoRotate(enabled) => {
            engine.set_auto_rotate(enabled);
            println!("auto-rotate {}", if enabled { "on" } else { "off" });
        }
        Command::SetMax(max) => match engine.set_max_messages_per_account(max) {
            Ok(()) => println!("max messages per account: {max}"),
            Err(error) => eprintln!("error: {error}"),
        },
        Command::Proxies(None) => {
            let stats = engine.proxy_stats();
            println!(
                "proxies: {} available / {} total ({} blacklisted)",
                stats.available, stats.total, stats.blacklisted
            );
        }
        Command::Proxies(Some(path)) => match std::fs::read_to_string(&path) {
            Ok(list) => {
                let count = engine.load_proxies(&list);
                println!("loaded {count} proxies from {}", path.display());
            }
            Err(error) => eprintln!("error: {error}"),
        },
        Command::Export(path) => {
            let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_FILE));
            match session::export_markdown(&path, engine.history()) {
                Ok(()) => println!("exported to {}", path.display()),
                Err(error) => eprintln!("error: {error:#}"),
            }
        }
        Command::Exit => {}
    }
}

/// Print engine state for `/status`
fn print_status<T: ChatTransport>(engine: &ConversationEngine<T>) {
    let state = engine.state();
    match state.account {
        Some(account) => println!(
            "account:     {} (created {})",
            account.code,
            account.created_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("account:     none"),
    }
    println!(
        "messages:    {}/{} on this account",
        state.message_count, state.max_messages_per_account
    );
    println!("history:     {} messages", state.history_len);
    println!(
        "auto-rotate: {}",
        if state.auto_rotate { "on" } else { "off" }
    );
    println!(
        "proxies:     {} available / {} total ({} blacklisted)",
        state.proxies.available, state.proxies.total, state.proxies.blacklisted
    );
}

/// Print queued events without blocking
fn drain(events: &mut mpsc::UnboundedReceiver<EngineEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

/// Render one engine event for the terminal.
///
/// Command confirmations are printed by the command handlers; this only
/// voices what the engine does on its own.
fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::AccountCreating => println!("(creating account...)"),
        EngineEvent::AccountCodeIssued { code } => println!("(access code issued: {code})"),
        EngineEvent::AccountCreated { account } => println!("(account {} ready)", account.code),
        EngineEvent::AccountRotating {
            previous: Some(_),
            message_count,
        } => println!("(rotating account after {message_count} messages)"),
        EngineEvent::AccountError { message } => println!("(account error: {message})"),
        EngineEvent::StreamTextDelta { delta, .. } => {
            print!("{delta}");
            let _ = io::stdout().flush();
        }
        EngineEvent::MessageReceived { .. } => println!(),
        EngineEvent::ProxyBlacklisted { key, reason } => {
            println!("(proxy {key} blacklisted: {reason})");
        }
        EngineEvent::ProxiesExhausted => println!("(proxy pool exhausted)"),
        _ => {}
    }
}

/// Short role tag for history listings
fn role_label(message: &skyway_engine::ChatMessage) -> &'static str {
    match message.role {
        skyway_engine::MessageRole::User => "you",
        skyway_engine::MessageRole::Assistant => "assistant",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_plain_input_is_not_a_command() {
        assert_eq!(Command::parse("hello there"), None);
        assert_eq!(Command::parse("what does /help do?"), None);
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(Command::parse("/help"), Some(Ok(Command::Help)));
        assert_eq!(Command::parse("/clear"), Some(Ok(Command::Clear)));
        assert_eq!(Command::parse("/history"), Some(Ok(Command::History)));
        assert_eq!(Command::parse("/status"), Some(Ok(Command::Status)));
        assert_eq!(Command::parse("/rotate"), Some(Ok(Command::Rotate)));
        assert_eq!(Command::parse("/exit"), Some(Ok(Command::Exit)));
        assert_eq!(Command::parse("/quit"), Some(Ok(Command::Exit)));
    }

    #[test]
    fn test_optional_path_arguments() {
        assert_eq!(Command::parse("/save"), Some(Ok(Command::Save(None))));
        assert_eq!(
            Command::parse("/save chat.json"),
            Some(Ok(Command::Save(Some(PathBuf::from("chat.json")))))
        );
        // Paths may contain spaces; everything after the command counts.
        assert_eq!(
            Command::parse("/load my session.json"),
            Some(Ok(Command::Load(Some(PathBuf::from("my session.json")))))
        );
        assert_eq!(
            Command::parse("/export notes.md"),
            Some(Ok(Command::Export(Some(PathBuf::from("notes.md")))))
        );
        assert_eq!(Command::parse("/proxies"), Some(Ok(Command::Proxies(None))));
    }

    #[test]
    fn test_autorotate_arguments() {
        assert_eq!(
            Command::parse("/autorotate on"),
            Some(Ok(Command::AutoRotate(true)))
        );
        assert_eq!(
            Command::parse("/autorotate off"),
            Some(Ok(Command::AutoRotate(false)))
        );
        assert!(matches!(Command::parse("/autorotate"), Some(Err(_))));
        assert!(matches!(Command::parse("/autorotate maybe"), Some(Err(_))));
    }

    #[test]
    fn test_setmax_arguments() {
        assert_eq!(Command::parse("/setmax 3"), Some(Ok(Command::SetMax(3))));
        assert!(matches!(Command::parse("/setmax"), Some(Err(_))));
        assert!(matches!(Command::parse("/setmax many"), Some(Err(_))));
        assert!(matches!(Command::parse("/setmax -1"), Some(Err(_))));
    }

    #[test]
    fn test_unknown_command() {
        match Command::parse("/frobnicate") {
            Some(Err(message)) => assert!(message.contains("/frobnicate")),
            other => panic!("Expected usage error, got {other:?}"),
        }
    }
}
