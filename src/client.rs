//! Reconnecting WebSocket client for the workspace presence channel.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, automatic reconnection
//!   with exponential backoff)
//! - Inbound frame decoding and ordered event delivery
//! - Fire-and-forget outbound send (at-most-once, never queued)
//!
//! One supervisor task owns the transport for the whole session and
//! drives the reconnect loop; the [`WorkspaceClient`] handle observes
//! shared state and never touches the socket directly. The outbound
//! path goes through a slot that is filled on open and cleared on
//! close, so sends while disconnected are dropped rather than queued.
//!
//! Closes that were not requested locally trigger reconnection with
//! exponentially growing delays (1s, 2s, 4s, 8s, 10s by default). Once
//! the retry ceiling is reached the client parks in
//! [`ConnectionState::Failed`] until the owner calls
//! [`WorkspaceClient::connect`] again.
//!
//! Reference: Kleppmann, Chapter 8 — The Trouble with Distributed Systems

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::protocol::{OutboundMessage, WsMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retry ceiling reached; parked until an explicit reconnect
    Failed,
}

/// Events emitted by the workspace client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established
    Connected,
    /// A previously open connection was lost
    Disconnected,
    /// A decoded inbound message
    Message(WsMessage),
    /// A connection-level error, in user-facing wording
    Error(String),
}

/// Client tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `ws://localhost:8000`
    pub base_url: String,
    /// Ceiling on consecutive automatic reconnect attempts
    pub max_reconnect_attempts: u32,
    /// Delay before the first retry; doubles per consecutive failure
    pub base_backoff: Duration,
    /// Upper bound on the retry delay
    pub max_backoff: Duration,
    /// Zero the failure counter when connect() is called explicitly
    /// after a terminal failure
    pub reset_attempts_on_retry: bool,
    /// Event channel capacity
    pub event_capacity: usize,
    /// Outbound channel capacity per connection
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000".to_string(),
            max_reconnect_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            reset_attempts_on_retry: false,
            event_capacity: 256,
            outbound_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Delay before the next reconnect attempt, given the number of
    /// consecutive failures so far.
    ///
    /// Doubles from `base_backoff` per failure, saturating at
    /// `max_backoff`: 1s, 2s, 4s, 8s, 10s with the defaults.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(failures))
            .min(self.max_backoff)
    }
}

/// Live outbound sender, present only while the transport is open.
type OutboundSlot = Arc<RwLock<Option<mpsc::Sender<Message>>>>;

/// Cloneable send handle.
///
/// Reads the outbound slot at each invocation rather than capturing a
/// transport at creation time, so one handle stays valid across
/// reconnects. Sends while disconnected are logged and dropped.
#[derive(Debug, Clone)]
pub struct WorkspaceSender {
    outbound: OutboundSlot,
}

impl WorkspaceSender {
    /// Stamp a draft and write it to the live transport.
    ///
    /// At-most-once: if the transport is not open or its channel is
    /// full, the message is dropped, never queued or retried.
    pub fn send(&self, draft: OutboundMessage) {
        let kind = draft.kind();
        let Some(tx) = self.outbound.read().clone() else {
            log::debug!("Dropping {kind} message while disconnected");
            return;
        };
        let text = match draft.stamped().encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {kind} message: {e}");
                return;
            }
        };
        if let Err(e) = tx.try_send(Message::Text(text.into())) {
            log::warn!("Dropping {kind} message: {e}");
        }
    }

    /// Whether a transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.outbound.read().is_some()
    }
}

/// The workspace client.
///
/// Owns one logical connection per (workspaceId, userId) pair and gives
/// its owner an ordered inbound event feed plus a best-effort outbound
/// send primitive.
pub struct WorkspaceClient {
    /// Workspace this connection is scoped to
    workspace_id: String,
    /// Local user identity, attached to the endpoint URL
    user_id: String,
    /// Tuning knobs
    config: ClientConfig,
    /// Connection state, shared with the supervisor task
    state: Arc<RwLock<ConnectionState>>,
    /// Last connection error, shared with the supervisor task
    connection_error: Arc<RwLock<Option<String>>>,
    /// Consecutive failures since the last successful open
    reconnect_attempts: Arc<RwLock<u32>>,
    /// Outbound slot, filled on open and cleared on close
    outbound: OutboundSlot,
    /// Event sender (held by the supervisor task)
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver for the owner
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    /// Shutdown signal for the supervisor task
    shutdown: Option<watch::Sender<bool>>,
    /// Supervisor task handle
    task: Option<JoinHandle<()>>,
}

impl WorkspaceClient {
    /// Create a new client for one (workspace, user) session.
    pub fn new(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        Self {
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connection_error: Arc::new(RwLock::new(None)),
            reconnect_attempts: Arc::new(RwLock::new(0)),
            outbound: Arc::new(RwLock::new(None)),
            event_tx,
            event_rx: Some(event_rx),
            shutdown: None,
            task: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Start the connection supervisor.
    ///
    /// Idempotent in intent: a no-op while the supervisor is already
    /// running. Never fails; open failures surface through
    /// [`ClientEvent::Error`] and [`WorkspaceClient::connection_error`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            log::debug!("connect() ignored, supervisor already running");
            return;
        }
        if self.config.reset_attempts_on_retry {
            *self.reconnect_attempts.write() = 0;
        }
        *self.state.write() = ConnectionState::Connecting;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = ConnectionDriver {
            url: self.endpoint_url(),
            config: self.config.clone(),
            state: self.state.clone(),
            connection_error: self.connection_error.clone(),
            reconnect_attempts: self.reconnect_attempts.clone(),
            outbound: self.outbound.clone(),
            event_tx: self.event_tx.clone(),
            shutdown_rx,
        };
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(driver.run()));
    }

    /// Tear the connection down.
    ///
    /// Cancels any pending reconnect timer, closes the live transport
    /// if present, and waits for the supervisor to stop. No events are
    /// emitted after this returns. Safe to call multiple times and when
    /// never connected.
    pub async fn disconnect(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Connection supervisor failed to stop cleanly: {e}");
            }
        }
        *self.state.write() = ConnectionState::Disconnected;
        *self.outbound.write() = None;
    }

    /// A cloneable send handle that stays valid across reconnects.
    pub fn sender(&self) -> WorkspaceSender {
        WorkspaceSender {
            outbound: self.outbound.clone(),
        }
    }

    /// Stamp a draft and send it if currently connected.
    pub fn send(&self, draft: OutboundMessage) {
        self.sender().send(draft);
    }

    /// Full endpoint URL for this (workspace, user) pair.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/ws/{}?userId={}",
            self.config.base_url.trim_end_matches('/'),
            self.workspace_id,
            self.user_id
        )
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    /// Last connection error, if any.
    pub fn connection_error(&self) -> Option<String> {
        self.connection_error.read().clone()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        *self.reconnect_attempts.read()
    }

    /// Get the workspace id.
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Get the local user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

// ───────────────────────────────────────────────────────────────────
// Connection supervisor
// ───────────────────────────────────────────────────────────────────

/// Why a pump loop ended.
enum PumpOutcome {
    /// Shutdown was signalled locally
    Shutdown,
    /// The transport closed or failed
    Closed,
}

/// The supervisor task: owns the transport, the reconnect loop, and
/// the backoff timer. Exactly one per started client.
struct ConnectionDriver {
    url: String,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    connection_error: Arc<RwLock<Option<String>>>,
    reconnect_attempts: Arc<RwLock<u32>>,
    outbound: OutboundSlot,
    event_tx: mpsc::Sender<ClientEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionDriver {
    async fn run(mut self) {
        loop {
            let failures = *self.reconnect_attempts.read();
            *self.state.write() = if failures == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };
            log::debug!("Connecting to {}", self.url);

            // A hung open attempt must not outlive teardown.
            let attempt = tokio::select! {
                attempt = connect_async(&self.url) => attempt,
                _ = self.shutdown_rx.changed() => {
                    log::info!("Connection supervisor stopped");
                    return;
                }
            };

            match attempt {
                Ok((ws, _)) => {
                    *self.reconnect_attempts.write() = 0;
                    *self.state.write() = ConnectionState::Connected;
                    *self.connection_error.write() = None;
                    // The slot must be live before Connected is observed,
                    // so a send racing the event cannot be dropped.
                    let (out_tx, out_rx) =
                        mpsc::channel::<Message>(self.config.outbound_capacity);
                    *self.outbound.write() = Some(out_tx);
                    log::info!("WebSocket connection established to {}", self.url);
                    let _ = self.event_tx.send(ClientEvent::Connected).await;

                    let outcome = self.pump(ws, out_rx).await;

                    *self.state.write() = ConnectionState::Disconnected;
                    *self.outbound.write() = None;
                    if matches!(outcome, PumpOutcome::Shutdown) {
                        log::info!("Connection supervisor stopped");
                        return;
                    }
                    let _ = self.event_tx.send(ClientEvent::Disconnected).await;
                }
                Err(WsError::Url(e)) => {
                    // A malformed endpoint cannot be retried into working.
                    log::error!("Invalid endpoint URL {}: {e}", self.url);
                    *self.state.write() = ConnectionState::Failed;
                    *self.connection_error.write() = Some("Failed to connect".to_string());
                    let _ = self
                        .event_tx
                        .send(ClientEvent::Error("Failed to connect".to_string()))
                        .await;
                    return;
                }
                Err(e) => {
                    log::warn!("Connection to {} failed: {e}", self.url);
                    *self.state.write() = ConnectionState::Disconnected;
                    *self.connection_error.write() = Some("Connection failed".to_string());
                    let _ = self
                        .event_tx
                        .send(ClientEvent::Error("Connection failed".to_string()))
                        .await;
                }
            }

            // Retry decision. The counter is consulted before being
            // incremented, so the first retry waits base_backoff and a
            // close after the ceiling is terminal.
            let failures = *self.reconnect_attempts.read();
            if failures >= self.config.max_reconnect_attempts {
                log::warn!("Giving up after {failures} reconnection attempts");
                *self.state.write() = ConnectionState::Failed;
                *self.connection_error.write() =
                    Some("Maximum reconnection attempts reached".to_string());
                let _ = self
                    .event_tx
                    .send(ClientEvent::Error(
                        "Maximum reconnection attempts reached".to_string(),
                    ))
                    .await;
                return;
            }
            let delay = self.config.backoff_delay(failures);
            *self.reconnect_attempts.write() = failures + 1;
            *self.state.write() = ConnectionState::Reconnecting;
            log::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                failures + 1,
                self.config.max_reconnect_attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.changed() => {
                    log::info!("Connection supervisor stopped during backoff");
                    return;
                }
            }
        }
    }

    /// Drive one open connection until it closes or shutdown is
    /// signalled. The caller fills the outbound slot before and clears
    /// it after.
    async fn pump(
        &mut self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        mut out_rx: mpsc::Receiver<Message>,
    ) -> PumpOutcome {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return PumpOutcome::Shutdown;
                }
                maybe = out_rx.recv() => match maybe {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            // The read side surfaces the close.
                            log::warn!("Failed to write frame: {e}");
                        }
                    }
                    None => return PumpOutcome::Closed,
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match WsMessage::decode(text.as_str()) {
                        Ok(message) => {
                            let _ = self.event_tx.send(ClientEvent::Message(message)).await;
                        }
                        Err(e) => log::warn!("Failed to decode inbound frame: {e}"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("WebSocket connection closed");
                        return PumpOutcome::Closed;
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket transport error: {e}");
                        *self.connection_error.write() = Some("Connection failed".to_string());
                        let _ = self
                            .event_tx
                            .send(ClientEvent::Error("Connection failed".to_string()))
                            .await;
                        return PumpOutcome::Closed;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}
