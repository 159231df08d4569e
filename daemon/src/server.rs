//! Daemon Server Implementation
//!
//! This module provides the core server loop for the Skyway daemon:
//! - Accepts WebSocket connections on a TCP listener
//! - Spawns a handler task per connection, each owning its own
//!   `ConversationEngine`
//! - Tracks live sessions in a concurrent registry
//! - Saves sessions on disconnect and on graceful shutdown
//!
//! # Session Architecture
//!
//! Every connection is an isolated conversation with its own account,
//! proxy pool, and history:
//!
//! ```text
//!                     DaemonServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!     Web Client      CLI Client      Script Client
//!     (sess-a…)       (sess-b…)       (sess-c…)
//!          │               │               │
//!      Engine A         Engine B        Engine C
//!          └───────────────┴───────────────┘
//!                          │
//!                    SessionStore
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use skyway_engine::{ConversationEngine, EngineConfig, EngineEvent, EventSink, HttpTransport};

use crate::protocol::{ClientCommand, ServerMessage};
use crate::store::SessionStore;

type WsSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// Session state tracked by the server (the engine itself lives in the
/// handler task)
struct SessionState {
    /// When the connection was established
    connected_at: Instant,
    /// Handle to abort the handler task
    abort_handle: tokio::task::AbortHandle,
}

/// Configuration for the daemon server
pub struct ServerConfig {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// How long graceful shutdown waits for sessions to save and unwind
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// The main daemon server
pub struct DaemonServer {
    /// Address the TCP listener binds to
    bind_addr: String,
    /// Engine configuration applied to every session
    engine_config: EngineConfig,
    /// Session file store
    store: SessionStore,
    /// Server configuration
    server_config: ServerConfig,
    /// Live session registry
    sessions: Arc<DashMap<String, SessionState>>,
}

impl DaemonServer {
    /// Create a new daemon server
    pub fn new(bind_addr: String, engine_config: EngineConfig, store: SessionStore) -> Self {
        Self {
            bind_addr,
            engine_config,
            store,
            server_config: ServerConfig::default(),
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Run the daemon server until the shutdown flag is set
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        self.store.prepare()?;

        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_addr))?;

        info!(addr = %self.bind_addr, "Listening for WebSocket connections");

        // Watch channel telling live sessions to save and unwind
        let (notify_tx, _) = watch::channel(false);

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            // Accept with timeout to allow checking the shutdown flag
            let accepted =
                tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;

            let (stream, peer) = match accepted {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
                Err(_) => {
                    // Timeout, loop back to check shutdown
                    continue;
                }
            };

            if self.sessions.len() >= self.server_config.max_sessions {
                warn!("Session limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            let session_id = generate_session_id();
            info!(
                session = %session_id,
                peer = %peer,
                active_sessions = self.sessions.len() + 1,
                "New connection accepted"
            );

            let sessions = Arc::clone(&self.sessions);
            let engine_config = self.engine_config.clone();
            let store = self.store.clone();
            let notify_rx = notify_tx.subscribe();

            let task = tokio::spawn(
                handle_session(
                    session_id.clone(),
                    stream,
                    engine_config,
                    store,
                    sessions,
                    notify_rx,
                )
                .instrument(tracing::info_span!("session", id = %session_id)),
            );

            self.sessions.insert(
                session_id,
                SessionState {
                    connected_at: Instant::now(),
                    abort_handle: task.abort_handle(),
                },
            );
        }

        self.shutdown(&notify_tx).await
    }

    /// Graceful shutdown: signal sessions, wait, abort stragglers
    async fn shutdown(&mut self, notify: &watch::Sender<bool>) -> Result<()> {
        info!("Initiating graceful shutdown");

        let _ = notify.send(true);

        let deadline = Instant::now() + self.server_config.shutdown_grace;
        while !self.sessions.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let session_ids: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        for session_id in session_ids {
            if let Some((_, state)) = self.sessions.remove(&session_id) {
                warn!(session = %session_id, "Aborting session that did not unwind in time");
                state.abort_handle.abort();
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Mint a fresh session id
fn generate_session_id() -> String {
    format!("sess-{}", Uuid::new_v4())
}

/// Check a client-presented session id before it touches a file path
fn valid_session_id(id: &str) -> bool {
    match id.strip_prefix("sess-") {
        Some(rest) => rest.len() == 36 && rest.chars().all(|c| c.is_ascii_hexdigit() || c == '-'),
        None => false,
    }
}

/// Handle one WebSocket session end to end.
///
/// Owns the session's engine. Commands arrive as JSON text frames and each
/// is answered with a frame of the same type; engine events stream out as
/// `event` frames while operations run. The session is saved on disconnect
/// whenever any history exists.
async fn handle_session(
    mut session_id: String,
    stream: TcpStream,
    engine_config: EngineConfig,
    store: SessionStore,
    sessions: Arc<DashMap<String, SessionState>>,
    mut notify_rx: watch::Receiver<bool>,
) {
    info!("Session handler started");

    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake failed");
            sessions.remove(&session_id);
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    let transport = Arc::new(HttpTransport::from_config(&engine_config));
    let (events, mut event_rx) = EventSink::channel();
    let mut engine = ConversationEngine::with_events(transport, engine_config, events);

    let hello = ServerMessage::Session {
        id: session_id.clone(),
    };
    if send_frame(&mut ws_tx, &hello).await.is_err() {
        sessions.remove(&session_id);
        return;
    }

    loop {
        tokio::select! {
            _ = notify_rx.changed() => {
                info!("Shutdown notice received");
                break;
            }
            Some(event) = event_rx.recv() => {
                if send_frame(&mut ws_tx, &ServerMessage::Event { event }).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let response = match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(command) => {
                                debug!(?command, "Command received");
                                dispatch(
                                    &mut engine,
                                    &mut event_rx,
                                    &mut ws_tx,
                                    &store,
                                    &mut session_id,
                                    &sessions,
                                    command,
                                )
                                .await
                            }
                            Err(e) => {
                                warn!(error = %e, "Unparseable command frame");
                                ServerMessage::Error {
                                    message: format!("invalid command: {e}"),
                                }
                            }
                        };
                        forward_pending(&mut event_rx, &mut ws_tx).await;
                        if send_frame(&mut ws_tx, &response).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client closed connection");
                        break;
                    }
                    // Ping and pong are answered by the protocol layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        break;
                    }
                    None => {
                        info!("Client disconnected");
                        break;
                    }
                }
            }
        }
    }

    if !engine.history().is_empty() {
        match store.save(&session_id, engine.history(), engine.message_count()) {
            Ok(messages) => info!(messages, "Session saved on disconnect"),
            Err(e) => warn!(error = %e, "Failed to save session on disconnect"),
        }
    }

    if let Some((_, state)) = sessions.remove(&session_id) {
        info!(
            uptime_secs = state.connected_at.elapsed().as_secs(),
            active_sessions = sessions.len(),
            "Session handler finished"
        );
    }
}

/// Execute one command and build the mirrored response frame.
///
/// `send-message` is the streaming case: queued engine events are forwarded
/// over the socket while the reply is in flight, so deltas arrive
/// incrementally instead of after the fact.
async fn dispatch(
    engine: &mut ConversationEngine<HttpTransport>,
    event_rx: &mut mpsc::UnboundedReceiver<EngineEvent>,
    ws_tx: &mut WsSink,
    store: &SessionStore,
    session_id: &mut String,
    sessions: &DashMap<String, SessionState>,
    command: ClientCommand,
) -> ServerMessage {
    match command {
        ClientCommand::SendMessage { text } => {
            let send = engine.send_message(text);
            tokio::pin!(send);
            let mut sink_alive = true;
            let result = loop {
                tokio::select! {
                    result = &mut send => break result,
                    Some(event) = event_rx.recv() => {
                        if sink_alive
                            && send_frame(ws_tx, &ServerMessage::Event { event }).await.is_err()
                        {
                            sink_alive = false;
                        }
                    }
                }
            };
            match result {
                Ok(reply) => ServerMessage::SendMessage { text: reply },
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            }
        }
        ClientCommand::ClearHistory => {
            let dropped = engine.history().len();
            engine.clear_history();
            ServerMessage::ClearHistory { dropped }
        }
        ClientCommand::GetHistory => ServerMessage::GetHistory {
            messages: engine.history().to_vec(),
        },
        ClientCommand::GetState => ServerMessage::GetState {
            state: engine.state(),
        },
        ClientCommand::RotateAccount => match engine.rotate_account().await {
            Ok(()) => ServerMessage::RotateAccount {
                account: engine.account_info(),
            },
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
            },
        },
        ClientCommand::SetAutoRotate { enabled } => {
            engine.set_auto_rotate(enabled);
            ServerMessage::SetAutoRotate { enabled }
        }
        ClientCommand::SetMaxMessages { max } => match engine.set_max_messages_per_account(max) {
            Ok(()) => ServerMessage::SetMaxMessages { max },
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
            },
        },
        ClientCommand::SaveSession => {
            match store.save(session_id, engine.history(), engine.message_count()) {
                Ok(messages) => ServerMessage::SaveSession { messages },
                Err(e) => ServerMessage::Error {
                    message: format!("{e:#}"),
                },
            }
        }
        ClientCommand::LoadSession { id } => {
            let target = id.unwrap_or_else(|| session_id.clone());
            if !valid_session_id(&target) {
                return ServerMessage::Error {
                    message: format!("malformed session id: {target}"),
                };
            }
            if target != *session_id && sessions.contains_key(&target) {
                return ServerMessage::Error {
                    message: format!("session {target} is active on another connection"),
                };
            }
            match store.load(&target) {
                Ok(snapshot) => {
                    let messages = snapshot.history.len();
                    engine.load_history(snapshot.history, snapshot.message_count);
                    if target != *session_id {
                        adopt_session_id(sessions, session_id, &target);
                    }
                    ServerMessage::LoadSession {
                        id: session_id.clone(),
                        messages,
                    }
                }
                Err(e) => ServerMessage::Error {
                    message: format!("{e:#}"),
                },
            }
        }
    }
}

/// Re-key the registry when a session adopts a restored id, so later saves
/// and the disconnect save continue that session's file
fn adopt_session_id(sessions: &DashMap<String, SessionState>, current: &mut String, target: &str) {
    if let Some((_, state)) = sessions.remove(current) {
        sessions.insert(target.to_string(), state);
    }
    info!(from = %current, to = %target, "Session id adopted");
    *current = target.to_string();
}

/// Flush queued engine events to the client ahead of a response frame
async fn forward_pending(event_rx: &mut mpsc::UnboundedReceiver<EngineEvent>, ws_tx: &mut WsSink) {
    while let Ok(event) = event_rx.try_recv() {
        if send_frame(ws_tx, &ServerMessage::Event { event })
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Serialize and send one frame; an error means the connection is gone
async fn send_frame(ws_tx: &mut WsSink, message: &ServerMessage) -> Result<()> {
    let json = serde_json::to_string(message).context("Failed to serialize frame")?;
    ws_tx
        .send(Message::Text(json))
        .await
        .context("Failed to send frame")?;
    Ok(())
}
