//! Session Persistence
//!
//! Saves and restores conversations as JSON so a chat can continue across
//! runs, and exports transcripts as markdown.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skyway_engine::{ChatMessage, MessageRole};

/// On-disk session snapshot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFile {
    /// When the session was saved
    pub timestamp: DateTime<Utc>,
    /// Messages already sent on the account that was active at save time
    pub message_count: u32,
    /// Full conversation history
    pub history: Vec<ChatMessage>,
}

/// Save the conversation to `path` as pretty-printed JSON
pub fn save(path: &Path, history: &[ChatMessage], message_count: u32) -> Result<()> {
    let session = SessionFile {
        timestamp: Utc::now(),
        message_count,
        history: history.to_vec(),
    };
    let json = serde_json::to_string_pretty(&session).context("Failed to serialize session")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write session file: {}", path.display()))?;
    Ok(())
}

/// Load a saved session from `path`
pub fn load(path: &Path) -> Result<SessionFile> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;
    let session = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
    Ok(session)
}

/// Export the conversation to `path` as a markdown transcript
pub fn export_markdown(path: &Path, history: &[ChatMessage]) -> Result<()> {
    let mut out = String::from("# Skyway Conversation\n\n");
    out.push_str(&format!(
        "Exported {}\n",
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    ));
    for message in history {
        let heading = match message.role {
            MessageRole::User => "## You",
            MessageRole::Assistant => "## Assistant",
        };
        out.push_str(&format!("\n{heading}\n\n{}\n", message.text()));
    }
    fs::write(path, out).with_context(|| format!("Failed to write export: {}", path.display()))?;
    Ok(())
}
