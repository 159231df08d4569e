//! Engine Lifecycle Events
//!
//! Notifications the engine and its components publish for front-ends to
//! log or render. Delivery is fire-and-forget over an unbounded channel:
//! with no subscriber attached every emission is a no-op, and the engine
//! behaves identically either way.
//!
//! # Design Philosophy
//!
//! Front-ends are dumb renderers. They never feed decisions back through
//! this channel - rotation policy, retries and blacklisting run entirely
//! inside the engine, and these events only describe what already happened.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::account::AccountInfo;

/// Events from the engine to a subscribed front-end.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum EngineEvent {
    // ============================================
    // Account Lifecycle
    // ============================================
    /// Account creation started.
    AccountCreating,

    /// The service issued an access code for the account being created.
    AccountCodeIssued {
        /// The issued access code.
        code: String,
    },

    /// Account creation succeeded.
    AccountCreated {
        /// Summary of the new account.
        account: AccountInfo,
    },

    /// Rotation began (no current account, limit reached, or forced).
    AccountRotating {
        /// The account being replaced, if any.
        previous: Option<AccountInfo>,
        /// Messages sent on the outgoing account.
        message_count: u32,
    },

    /// Rotation finished; a fresh account is current.
    AccountRotated,

    /// Account creation failed.
    AccountError {
        /// Human-readable failure description.
        message: String,
    },

    // ============================================
    // Message Lifecycle
    // ============================================
    /// A user message was appended to history.
    MessageSent {
        /// Id of the appended message.
        id: String,
    },

    /// The chat request is about to be issued.
    MessageRequesting {
        /// Per-account counter this send will reach on success.
        message_count: u32,
        /// Configured per-account limit.
        max_messages: u32,
    },

    /// The service accepted the chat request; the reply stream is open.
    MessageReceiving,

    /// The assistant reply completed and was appended to history.
    MessageReceived {
        /// Full reply text.
        text: String,
        /// Per-account counter after this send.
        message_count: u32,
    },

    /// The send failed; no assistant message was appended.
    MessageError {
        /// Human-readable failure description.
        message: String,
    },

    // ============================================
    // Stream Progress
    // ============================================
    /// The reply stream opened.
    StreamStarted,

    /// A reply step began.
    StreamStepStarted,

    /// A text segment opened.
    StreamTextStarted {
        /// Segment id, when the service provided one.
        id: Option<String>,
    },

    /// A text fragment arrived.
    StreamTextDelta {
        /// Segment id, when provided.
        id: Option<String>,
        /// The fragment itself.
        delta: String,
        /// Accumulated reply text including this fragment.
        text: String,
    },

    /// The text segment closed.
    StreamTextEnded {
        /// Segment id, when provided.
        id: Option<String>,
    },

    /// A reply step completed.
    StreamStepFinished,

    /// The service marked the reply finished.
    StreamFinished,

    // ============================================
    // History & Configuration
    // ============================================
    /// History was cleared (counter reset too).
    HistoryCleared {
        /// Number of messages discarded.
        previous_len: usize,
    },

    /// History was replaced from a saved snapshot.
    HistoryLoaded {
        /// Messages now in history.
        messages: usize,
        /// Restored per-account counter.
        counter: u32,
    },

    /// The auto-rotate flag changed.
    AutoRotateChanged {
        /// New flag value.
        enabled: bool,
    },

    /// The per-account message limit changed.
    MaxMessagesChanged {
        /// New limit.
        max: u32,
    },

    // ============================================
    // Proxy Pool
    // ============================================
    /// A proxy list was loaded, replacing the pool.
    ProxiesLoaded {
        /// Proxies parsed from the list.
        count: usize,
    },

    /// One proxy was appended to the pool.
    ProxyAdded {
        /// `host:port` key of the proxy.
        key: String,
    },

    /// A proxy was blacklisted.
    ProxyBlacklisted {
        /// `host:port` key of the proxy.
        key: String,
        /// Why it was blacklisted.
        reason: String,
    },

    /// Rotation moved the cursor to a proxy.
    ProxySwitched {
        /// `host:port` key of the proxy now current.
        key: String,
    },

    /// Every configured proxy is now blacklisted.
    ProxiesExhausted,
}

/// Cloneable handle the engine's components publish [`EngineEvent`]s through.
///
/// The default sink has no subscriber and drops every event. [`emit`] never
/// blocks and never fails, so emission points cannot stall on a slow or
/// absent front-end.
///
/// [`emit`]: EventSink::emit
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    /// Sink forwarding events into `tx`.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink with no subscriber.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Subscribed sink plus its receiving end.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Publish one event. A missing or closed channel is ignored.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Whether a subscriber was ever attached.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.tx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_swallows_events() {
        let sink = EventSink::disabled();
        sink.emit(EngineEvent::AccountCreating);
        sink.emit(EngineEvent::StreamFinished);
        assert!(!sink.is_subscribed());
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        // Must not panic or error once the subscriber is gone.
        sink.emit(EngineEvent::MessageReceiving);
    }

    #[test]
    fn events_arrive_in_emission_order() {
        let (sink, mut rx) = EventSink::channel();

        sink.emit(EngineEvent::AccountCreating);
        sink.emit(EngineEvent::AccountCodeIssued {
            code: "WELCOME1".to_string(),
        });
        sink.emit(EngineEvent::AccountRotated);

        assert_eq!(rx.try_recv().ok(), Some(EngineEvent::AccountCreating));
        assert_eq!(
            rx.try_recv().ok(),
            Some(EngineEvent::AccountCodeIssued {
                code: "WELCOME1".to_string()
            })
        );
        assert_eq!(rx.try_recv().ok(), Some(EngineEvent::AccountRotated));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_serialize_for_forwarding() {
        let event = EngineEvent::StreamTextDelta {
            id: Some("seg0".to_string()),
            delta: "Hi".to_string(),
            text: "Hi".to_string(),
        };

        let json = serde_json::to_string(&event).expect("serialize");
        let back: EngineEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
    }
}
