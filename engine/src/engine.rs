//! Conversation Engine
//!
//! The orchestrator: owns the conversation history, the current account,
//! the proxy pool, and the per-account message counter, and drives the
//! send/stream/append cycle against the remote service.
//!
//! # Send Cycle
//!
//! 1. Rotate (or first-provision) the account when auto-rotation demands it
//! 2. Append the user message to history and snapshot the chat payload
//! 3. Stream the reply, decoding events as chunks arrive
//! 4. Append the assistant reply and advance the per-account counter
//!
//! A failed send leaves the user message in history and the counter
//! untouched; nothing of a partial reply is kept.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::account::{Account, AccountInfo, AccountManager};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::message::{ChatMessage, ChatPayload};
use crate::proxy::{Proxy, ProxyPool, ProxyPoolStats};
use crate::stream::{StreamDecoder, StreamEvent};
use crate::transport::{ChatTransport, TransportError, TransportRequest};

// =============================================================================
// State Snapshot
// =============================================================================

/// Point-in-time view of the engine, safe to serialize for surfaces
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// Whether an account is currently held
    pub has_account: bool,
    /// Snapshot of the held account, if any
    pub account: Option<AccountInfo>,
    /// Messages sent on the current account
    pub message_count: u32,
    /// Messages allowed per account before rotation
    pub max_messages_per_account: u32,
    /// Messages in the conversation history
    pub history_len: usize,
    /// Whether accounts rotate automatically
    pub auto_rotate: bool,
    /// Proxy pool counters
    pub proxies: ProxyPoolStats,
}

// =============================================================================
// Conversation Engine
// =============================================================================

/// Headless conversation engine over a [`ChatTransport`]
pub struct ConversationEngine<T: ChatTransport> {
    /// Resolved configuration (mutable at runtime through setters)
    config: EngineConfig,
    /// Transport shared with the account manager
    transport: Arc<T>,
    /// Proxy rotation state
    proxies: ProxyPool,
    /// Account provisioning
    accounts: AccountManager<T>,
    /// The account messages are currently sent under
    account: Option<Account>,
    /// Messages sent on the current account
    messages_sent: u32,
    /// Full conversation, user and assistant turns interleaved
    history: Vec<ChatMessage>,
    /// Event sink shared by every component
    events: EventSink,
}

impl<T: ChatTransport> ConversationEngine<T> {
    /// Engine with no event subscriber
    pub fn new(transport: Arc<T>, config: EngineConfig) -> Self {
        Self::with_events(transport, config, EventSink::disabled())
    }

    /// Engine publishing lifecycle events to `events`
    pub fn with_events(transport: Arc<T>, config: EngineConfig, events: EventSink) -> Self {
        debug!(transport = transport.name(), "Conversation engine ready");
        Self {
            proxies: ProxyPool::new(events.clone()),
            accounts: AccountManager::new(transport.clone(), events.clone()),
            config,
            transport,
            account: None,
            messages_sent: 0,
            history: Vec::new(),
            events,
        }
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Send a user message and return the complete assistant reply.
    ///
    /// Provisions or rotates the account first when auto-rotation calls for
    /// it. The user message is appended to history before the request goes
    /// out and stays there even when the send fails; the per-account
    /// counter only advances on success.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoAccount`] with auto-rotation off and no account
    /// - Any provisioning error from the rotation step
    /// - [`EngineError::Connection`] or [`EngineError::RateLimited`] when
    ///   the chat request itself fails
    pub async fn send_message(&mut self, text: impl Into<String>) -> Result<String, EngineError> {
        self.rotate_if_needed().await?;

        let (cookie, proxy) = match &self.account {
            Some(account) => (account.cookie_header(), account.proxy.clone()),
            None => return Err(EngineError::NoAccount),
        };

        let user = ChatMessage::user(text);
        let user_id = user.id.clone();
        self.history.push(user);
        self.events.emit(EngineEvent::MessageSent { id: user_id });
        self.events.emit(EngineEvent::MessageRequesting {
            message_count: self.messages_sent + 1,
            max_messages: self.config.max_messages_per_account,
        });

        // Snapshot the payload now; later history edits must not leak into
        // an in-flight request.
        let payload = serde_json::to_value(ChatPayload::new(&self.history))
            .expect("Failed to serialize chat payload");

        let request = TransportRequest::post(self.config.url("/api/chat"))
            .with_header("User-Agent", &self.config.user_agent)
            .with_header("Accept", "*/*")
            .with_header("Origin", self.config.origin())
            .with_header("Referer", self.config.url("/"))
            .with_header("Cookie", cookie)
            .with_json(payload);

        let mut rx = match self
            .transport
            .request_streaming(request, proxy.as_ref())
            .await
        {
            Ok(rx) => rx,
            Err(error) => return Err(self.fail_send(proxy.as_ref(), error)),
        };

        self.events.emit(EngineEvent::MessageReceiving);

        let mut decoder = StreamDecoder::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.feed(&bytes) {
                        self.forward(event);
                    }
                }
                Err(error) => return Err(self.fail_send(proxy.as_ref(), error)),
            }
        }
        for event in decoder.finish() {
            self.forward(event);
        }

        let reply = decoder.into_text();
        self.history.push(ChatMessage::assistant(reply.clone()));
        self.messages_sent += 1;
        self.events.emit(EngineEvent::MessageReceived {
            text: reply.clone(),
            message_count: self.messages_sent,
        });

        Ok(reply)
    }

    /// Record a failed send: condemn the proxy when the failure was its
    /// fault, emit the error event, and translate to an engine error.
    fn fail_send(&mut self, proxy: Option<&Proxy>, error: TransportError) -> EngineError {
        warn!(%error, "Chat request failed");
        if error.is_proxy_attributable() {
            if let Some(proxy) = proxy {
                self.proxies.blacklist(&proxy.key(), &error.to_string());
            }
        }

        let error = match error {
            TransportError::RateLimited => EngineError::RateLimited { attempts: 1 },
            TransportError::UnexpectedStatus { status } => EngineError::RemoteProtocol {
                message: format!("unexpected status {status}"),
            },
            other => EngineError::Connection {
                message: other.to_string(),
            },
        };
        self.events.emit(EngineEvent::MessageError {
            message: error.to_string(),
        });
        error
    }

    /// Relay one decoded stream event to subscribers
    fn forward(&self, event: StreamEvent) {
        let event = match event {
            StreamEvent::Started => EngineEvent::StreamStarted,
            StreamEvent::StepStarted => EngineEvent::StreamStepStarted,
            StreamEvent::TextStarted { id } => EngineEvent::StreamTextStarted { id },
            StreamEvent::TextDelta { id, delta, text } => {
                EngineEvent::StreamTextDelta { id, delta, text }
            }
            StreamEvent::TextEnded { id } => EngineEvent::StreamTextEnded { id },
            StreamEvent::StepFinished => EngineEvent::StreamStepFinished,
            StreamEvent::Finished => EngineEvent::StreamFinished,
        };
        self.events.emit(event);
    }

    // =========================================================================
    // Account Lifecycle
    // =========================================================================

    /// Rotate when auto-rotation is on and the account is missing or spent
    async fn rotate_if_needed(&mut self) -> Result<(), EngineError> {
        if !self.config.auto_rotate {
            return Ok(());
        }
        let spent = self.messages_sent >= self.config.max_messages_per_account;
        if self.account.is_some() && !spent {
            return Ok(());
        }
        self.rotate_account().await
    }

    /// Force rotation to a fresh account.
    ///
    /// On failure the old account (and counter) stay in place, so a later
    /// send retries rotation.
    ///
    /// # Errors
    ///
    /// Propagates provisioning errors from the account manager.
    pub async fn rotate_account(&mut self) -> Result<(), EngineError> {
        self.events.emit(EngineEvent::AccountRotating {
            previous: self.account.as_ref().map(Account::info),
            message_count: self.messages_sent,
        });

        let account = self
            .accounts
            .create_account(&self.config, &mut self.proxies)
            .await?;
        self.account = Some(account);
        self.messages_sent = 0;
        self.events.emit(EngineEvent::AccountRotated);
        Ok(())
    }

    /// Snapshot of the held account, if any
    #[must_use]
    pub fn account_info(&self) -> Option<AccountInfo> {
        self.account.as_ref().map(Account::info)
    }

    // =========================================================================
    // History
    // =========================================================================

    /// The conversation so far
    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Messages sent on the current account
    #[must_use]
    pub fn message_count(&self) -> u32 {
        self.messages_sent
    }

    /// Drop the conversation and reset the per-account counter.
    ///
    /// The account itself is kept; clearing grants it a fresh message
    /// budget.
    pub fn clear_history(&mut self) {
        let previous_len = self.history.len();
        self.history.clear();
        self.messages_sent = 0;
        self.events
            .emit(EngineEvent::HistoryCleared { previous_len });
    }

    /// Replace the conversation with a restored one.
    ///
    /// `counter` restores the per-account position a saved session was at;
    /// pass 0 when the restored conversation should start a fresh budget.
    pub fn load_history(&mut self, messages: Vec<ChatMessage>, counter: u32) {
        self.history = messages;
        self.messages_sent = counter;
        self.events.emit(EngineEvent::HistoryLoaded {
            messages: self.history.len(),
            counter,
        });
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// The resolved configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Turn automatic account rotation on or off
    pub fn set_auto_rotate(&mut self, enabled: bool) {
        self.config.auto_rotate = enabled;
        self.events
            .emit(EngineEvent::AutoRotateChanged { enabled });
    }

    /// Change the per-account message limit.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for a limit below 1; the
    /// prior limit stays in force.
    pub fn set_max_messages_per_account(&mut self, max: u32) -> Result<(), EngineError> {
        if max < 1 {
            return Err(EngineError::Configuration(
                "max messages per account must be at least 1".to_string(),
            ));
        }
        self.config.max_messages_per_account = max;
        self.events.emit(EngineEvent::MaxMessagesChanged { max });
        Ok(())
    }

    /// Point-in-time engine state
    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState {
            has_account: self.account.is_some(),
            account: self.account_info(),
            message_count: self.messages_sent,
            max_messages_per_account: self.config.max_messages_per_account,
            history_len: self.history.len(),
            auto_rotate: self.config.auto_rotate,
            proxies: self.proxies.stats(),
        }
    }

    // =========================================================================
    // Proxies
    // =========================================================================

    /// Replace the proxy pool from list text; returns how many loaded
    pub fn load_proxies(&mut self, source: &str) -> usize {
        self.proxies.load(source)
    }

    /// Append one proxy to the pool
    pub fn add_proxy(&mut self, proxy: Proxy) {
        self.proxies.add(proxy);
    }

    /// Forgive every blacklisted proxy; returns how many were cleared
    pub fn clear_proxy_blacklist(&mut self) -> usize {
        self.proxies.clear_blacklist()
    }

    /// Proxy pool counters
    #[must_use]
    pub fn proxy_stats(&self) -> ProxyPoolStats {
        self.proxies.stats()
    }
}
