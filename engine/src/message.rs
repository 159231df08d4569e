//! Chat Messages and Wire Payloads
//!
//! The message model mirrors the remote service's JSON shapes exactly: a
//! user message carries a single text part, an assistant message carries a
//! step marker followed by the final text with a `done` state. History is a
//! flat sequence of these records, serialized as-is into the chat request
//! payload, so anything loaded from a saved session goes back over the wire
//! byte-compatible with what the service's own web client would send.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of generated message and chat-request ids.
const ID_LEN: usize = 16;

/// Generate a 16-character alphanumeric id in the format the service's web
/// client produces.
#[must_use]
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Local user input.
    User,
    /// Remote assistant reply.
    Assistant,
}

/// Completion state of an assistant text part.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextState {
    /// The text is final.
    Done,
}

/// One element of a message body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
        /// Completion state; the service sets this on assistant parts only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<TextState>,
    },
    /// Marker the service places before assistant text.
    StepStart,
}

/// One history record, wire-shaped.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// 16-character alphanumeric id.
    pub id: String,
    /// Author role.
    pub role: MessageRole,
    /// Ordered content parts.
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    /// User message with a single text part.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            role: MessageRole::User,
            parts: vec![ContentPart::Text {
                text: text.into(),
                state: None,
            }],
        }
    }

    /// Assistant message: step marker, then the final text marked done.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            role: MessageRole::Assistant,
            parts: vec![
                ContentPart::StepStart,
                ContentPart::Text {
                    text: text.into(),
                    state: Some(TextState::Done),
                },
            ],
        }
    }

    /// Concatenated content of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text, .. } => Some(text.as_str()),
                ContentPart::StepStart => None,
            })
            .collect()
    }
}

/// Body of a `POST /api/chat` request.
///
/// Borrows the history snapshot it is built over; serialize it before
/// mutating history again.
#[derive(Debug, Serialize)]
pub struct ChatPayload<'a> {
    /// Request id (16-character alphanumeric).
    pub id: String,
    /// Full history, including the just-appended user message.
    pub messages: &'a [ChatMessage],
    /// Fixed trigger marker the service's web client sends.
    pub trigger: &'static str,
}

impl<'a> ChatPayload<'a> {
    /// The only trigger value the service accepts.
    pub const TRIGGER: &'static str = "submit-message";

    /// Payload over a history snapshot, with a fresh request id.
    #[must_use]
    pub fn new(messages: &'a [ChatMessage]) -> Self {
        Self {
            id: generate_id(),
            messages,
            trigger: Self::TRIGGER,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn generated_ids_are_sixteen_alphanumerics() {
        for _ in 0..32 {
            let id = generate_id();
            assert_eq!(id.len(), 16);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn user_message_wire_shape() {
        let mut message = ChatMessage::user("hello there");
        message.id = "aaaabbbbccccdddd".to_string();

        assert_eq!(
            serde_json::to_value(&message).expect("serialize"),
            json!({
                "id": "aaaabbbbccccdddd",
                "role": "user",
                "parts": [{ "type": "text", "text": "hello there" }],
            })
        );
    }

    #[test]
    fn assistant_message_wire_shape() {
        let mut message = ChatMessage::assistant("Hi!");
        message.id = "0000111122223333".to_string();

        assert_eq!(
            serde_json::to_value(&message).expect("serialize"),
            json!({
                "id": "0000111122223333",
                "role": "assistant",
                "parts": [
                    { "type": "step-start" },
                    { "type": "text", "text": "Hi!", "state": "done" },
                ],
            })
        );
    }

    #[test]
    fn payload_wire_shape() {
        let mut user = ChatMessage::user("ping");
        user.id = "u000000000000000".to_string();
        let history = vec![user];

        let mut payload = ChatPayload::new(&history);
        payload.id = "r000000000000000".to_string();

        assert_eq!(
            serde_json::to_value(&payload).expect("serialize"),
            json!({
                "id": "r000000000000000",
                "messages": [{
                    "id": "u000000000000000",
                    "role": "user",
                    "parts": [{ "type": "text", "text": "ping" }],
                }],
                "trigger": "submit-message",
            })
        );
    }

    #[test]
    fn history_round_trips_through_json() {
        let history = vec![ChatMessage::user("q"), ChatMessage::assistant("a")];

        let json = serde_json::to_string(&history).expect("serialize");
        let back: Vec<ChatMessage> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, history);
    }

    #[test]
    fn message_text_skips_step_markers() {
        let message = ChatMessage::assistant("final answer");
        assert_eq!(message.text(), "final answer");

        let message = ChatMessage {
            id: generate_id(),
            role: MessageRole::Assistant,
            parts: vec![
                ContentPart::StepStart,
                ContentPart::Text {
                    text: "part one ".to_string(),
                    state: None,
                },
                ContentPart::Text {
                    text: "part two".to_string(),
                    state: Some(TextState::Done),
                },
            ],
        };
        assert_eq!(message.text(), "part one part two");
    }
}
