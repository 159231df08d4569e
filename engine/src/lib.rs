//! Skyway Engine - Headless Chat Orchestration over Disposable Accounts
//!
//! This crate provides the core session logic for skyway, completely
//! independent of any user interface. It can drive a CLI, a daemon, a web
//! surface, or run headless for testing/automation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Surfaces                                 │
//! │   ┌─────────────┐   ┌──────────────┐   ┌─────────────────────┐  │
//! │   │     CLI     │   │    Daemon    │   │      Headless       │  │
//! │   │  (skyway)   │   │ (WebSocket)  │   │                     │  │
//! │   └──────┬──────┘   └──────┬───────┘   └──────────┬──────────┘  │
//! │          └─────────────────┴───────────────────────┘             │
//! │                            │                                     │
//! │                     EngineEvent (up)                             │
//! │                     method calls (down)                          │
//! └────────────────────────────┼─────────────────────────────────────┘
//!                              │
//! ┌────────────────────────────┼─────────────────────────────────────┐
//! │                     SKYWAY ENGINE                                │
//! │  ┌─────────────────────────┴───────────────────────────────────┐ │
//! │  │                  ConversationEngine                          │ │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌─────────────┐  │ │
//! │  │  │ Account  │  │  Proxy   │  │  Stream  │  │  Transport  │  │ │
//! │  │  │ Manager  │  │  Pool    │  │  Decoder │  │   (HTTP)    │  │ │
//! │  │  └──────────┘  └──────────┘  └──────────┘  └─────────────┘  │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ConversationEngine`]: The orchestrator owning history, account, and
//!   proxy state
//! - [`EngineEvent`]: Lifecycle events published to surfaces
//! - [`EngineConfig`]: Resolved configuration (defaults, file, env, CLI)
//! - [`ChatTransport`]: The wire seam, with [`HttpTransport`] as the
//!   production implementation
//! - [`ProxyPool`]: Ordered proxy rotation with a persistent blacklist
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use skyway_engine::{
//!     config::load_config,
//!     events::EventSink,
//!     transport::HttpTransport,
//!     ConversationEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = load_config().unwrap();
//!     let transport = Arc::new(HttpTransport::from_config(&config));
//!
//!     // Subscribe to lifecycle events
//!     let (events, mut rx) = EventSink::channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = rx.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     let mut engine = ConversationEngine::with_events(transport, config, events);
//!
//!     // First send provisions an account automatically
//!     let reply = engine.send_message("Hello!").await.unwrap();
//!     println!("{reply}");
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`account`]: Disposable-account provisioning (access code + login)
//! - [`config`]: Configuration loading with file/env/CLI priority
//! - [`engine`]: The conversation orchestrator
//! - [`error`]: Engine error taxonomy
//! - [`events`]: Lifecycle events and the sink surfaces subscribe through
//! - [`message`]: Chat message model and the wire payload
//! - [`proxy`]: Proxy pool rotation and blacklisting
//! - [`stream`]: Incremental decoder for the reply event stream
//! - [`transport`]: HTTP transport abstraction
//!
//! # No Surface Dependencies
//!
//! This crate has **zero** dependencies on any terminal or server
//! framework. It's pure session logic that can be embedded anywhere.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod account;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod proxy;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use account::{Account, AccountInfo, AccountManager};
pub use engine::{ConversationEngine, EngineState};
pub use error::EngineError;
pub use events::{EngineEvent, EventSink};
pub use message::{ChatMessage, ChatPayload, ContentPart, MessageRole, TextState};
pub use proxy::{Proxy, ProxyPool, ProxyPoolError, ProxyPoolStats};
pub use stream::{StreamDecoder, StreamEvent};
pub use transport::{ChatTransport, HttpTransport, TransportError, TransportRequest};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, EngineConfig,
};
