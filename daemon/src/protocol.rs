//! WebSocket Wire Protocol
//!
//! Every frame is a JSON object carried in a WebSocket text message, tagged
//! by a kebab-case `type` field. Clients send [`ClientCommand`] frames; the
//! daemon answers each command with a [`ServerMessage`] frame of the same
//! type, and forwards engine events as `{"type":"event",...}` frames as they
//! occur, so streaming deltas reach the client incrementally.

use serde::{Deserialize, Serialize};

use skyway_engine::{AccountInfo, ChatMessage, EngineEvent, EngineState};

/// A command frame sent by a connected client
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Send a chat message and stream the reply
    SendMessage {
        /// Message text
        text: String,
    },
    /// Drop the conversation and reset the per-account counter
    ClearHistory,
    /// Fetch the full conversation
    GetHistory,
    /// Fetch an engine state snapshot
    GetState,
    /// Force rotation to a fresh account
    RotateAccount,
    /// Toggle automatic account rotation
    SetAutoRotate {
        /// Whether rotation happens automatically
        enabled: bool,
    },
    /// Change the per-account message limit
    SetMaxMessages {
        /// Messages allowed per account, at least 1
        max: u32,
    },
    /// Persist this session to disk now
    SaveSession,
    /// Restore a saved session into this connection
    LoadSession {
        /// Saved session to restore; this session's own id when omitted.
        /// Presenting another session's id adopts it, so later saves
        /// continue that session's file.
        #[serde(default)]
        id: Option<String>,
    },
}

/// A frame sent by the daemon to a connected client
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame after the handshake, announcing the session id
    Session {
        /// Server-generated session id
        id: String,
    },
    /// An engine event forwarded while an operation runs
    Event {
        /// The engine event
        event: EngineEvent,
    },
    /// Reply to `send-message` with the full assistant text
    SendMessage {
        /// Assembled reply text
        text: String,
    },
    /// Reply to `clear-history`
    ClearHistory {
        /// How many messages were dropped
        dropped: usize,
    },
    /// Reply to `get-history`
    GetHistory {
        /// The conversation so far
        messages: Vec<ChatMessage>,
    },
    /// Reply to `get-state`
    GetState {
        /// Engine state snapshot
        state: EngineState,
    },
    /// Reply to `rotate-account`
    RotateAccount {
        /// The account now active
        account: Option<AccountInfo>,
    },
    /// Reply to `set-auto-rotate`
    SetAutoRotate {
        /// The setting now in effect
        enabled: bool,
    },
    /// Reply to `set-max-messages`
    SetMaxMessages {
        /// The limit now in effect
        max: u32,
    },
    /// Reply to `save-session`
    SaveSession {
        /// How many messages were written
        messages: usize,
    },
    /// Reply to `load-session`
    LoadSession {
        /// The session id now owning this connection
        id: String,
        /// How many messages were restored
        messages: usize,
    },
    /// A command failed; the connection stays open
    Error {
        /// What went wrong
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_command_tags_are_kebab_case() {
        let command: ClientCommand =
            serde_json::from_str(r#"{"type":"send-message","text":"hello"}"#).unwrap();
        assert_eq!(
            command,
            ClientCommand::SendMessage {
                text: "hello".to_string()
            }
        );

        let command: ClientCommand = serde_json::from_str(r#"{"type":"clear-history"}"#).unwrap();
        assert_eq!(command, ClientCommand::ClearHistory);

        let command: ClientCommand =
            serde_json::from_str(r#"{"type":"set-max-messages","max":3}"#).unwrap();
        assert_eq!(command, ClientCommand::SetMaxMessages { max: 3 });
    }

    #[test]
    fn test_load_session_id_is_optional() {
        let command: ClientCommand = serde_json::from_str(r#"{"type":"load-session"}"#).unwrap();
        assert_eq!(command, ClientCommand::LoadSession { id: None });

        let command: ClientCommand =
            serde_json::from_str(r#"{"type":"load-session","id":"sess-abc"}"#).unwrap();
        assert_eq!(
            command,
            ClientCommand::LoadSession {
                id: Some("sess-abc".to_string())
            }
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let result = serde_json::from_str::<ClientCommand>(r#"{"type":"self-destruct"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_frames_mirror_command_types() {
        let json = serde_json::to_value(ServerMessage::SendMessage {
            text: "hi there".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "send-message");
        assert_eq!(json["text"], "hi there");

        let json = serde_json::to_value(ServerMessage::ClearHistory { dropped: 4 }).unwrap();
        assert_eq!(json["type"], "clear-history");
        assert_eq!(json["dropped"], 4);

        let json = serde_json::to_value(ServerMessage::Error {
            message: "no account".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
    }

    #[test]
    fn test_event_frame_wraps_engine_event() {
        let json = serde_json::to_value(ServerMessage::Event {
            event: EngineEvent::StreamTextDelta {
                id: Some("t1".to_string()),
                delta: "Hel".to_string(),
                text: "Hel".to_string(),
            },
        })
        .unwrap();

        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["StreamTextDelta"]["delta"], "Hel");
    }
}
