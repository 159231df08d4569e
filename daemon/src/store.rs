//! Session File Store
//!
//! Persists one JSON file per session under the sessions directory. The file
//! shape matches what the `skyway` CLI writes with `/save`, so sessions move
//! freely between the two surfaces.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use skyway_engine::ChatMessage;

/// On-disk session snapshot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// When the session was saved
    pub timestamp: DateTime<Utc>,
    /// Messages already sent on the account that was active at save time
    pub message_count: u32,
    /// Full conversation history
    pub history: Vec<ChatMessage>,
}

/// Reads and writes per-session conversation files
#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Create the sessions directory if it does not exist yet
    pub fn prepare(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("Failed to create sessions directory: {:?}", self.dir))?;
            info!(path = ?self.dir, "Created sessions directory");
        }
        Ok(())
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Write a session file, returning how many messages were saved
    pub fn save(
        &self,
        session_id: &str,
        history: &[ChatMessage],
        message_count: u32,
    ) -> Result<usize> {
        let snapshot = SessionSnapshot {
            timestamp: Utc::now(),
            message_count,
            history: history.to_vec(),
        };
        let json =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize session")?;
        let path = self.path_for(session_id);
        fs::write(&path, json)
            .with_context(|| format!("Failed to write session file: {}", path.display()))?;
        Ok(snapshot.history.len())
    }

    /// Read a session file back
    pub fn load(&self, session_id: &str) -> Result<SessionSnapshot> {
        let path = self.path_for(session_id);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("No saved session: {}", path.display()))?;
        let snapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
        Ok(snapshot)
    }
}
