//! Workspace presence coordination.
//!
//! The coordinator owns a [`WorkspaceClient`] scoped to one workspace,
//! folds its event feed into a [`PresenceState`] read model, and
//! announces the local user exactly once per physical connection. UI
//! code observes the read model through a watch channel and reports
//! local cursor movement through [`PresenceCoordinator::update_cursor`].
//!
//! ```text
//!   UI reads ──▶ watch<PresenceState> ◀── send_modify ── event loop
//!                                                            ▲
//!                                                     ClientEvent feed
//!                                                            │
//!   UI update_cursor ──▶ WorkspaceSender ──▶ relay ──▶ WorkspaceClient
//! ```
//!
//! All state mutation happens on the event loop, in event order. The
//! watch channel hands consumers a live view: reading it twice can
//! observe two different snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::client::{ClientConfig, ClientEvent, WorkspaceClient, WorkspaceSender};
use crate::presence::{user_color, PresenceState};
use crate::protocol::{OutboundMessage, PresenceUser, WsMessage};

/// The local user's identity, supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

impl CurrentUser {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        avatar: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: avatar.into(),
        }
    }

    /// The wire-ready presence record, with the deterministic color.
    pub fn to_presence_user(&self) -> PresenceUser {
        PresenceUser {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            color: user_color(&self.id).to_string(),
            cursor: None,
        }
    }
}

/// Presence session for one (workspace, user) pair.
///
/// Creating a coordinator connects immediately; dropping it without
/// [`PresenceCoordinator::shutdown`] stops the transport but skips the
/// graceful close frame.
pub struct PresenceCoordinator {
    workspace_id: String,
    current_user: CurrentUser,
    client: WorkspaceClient,
    sender: WorkspaceSender,
    /// Read model; written by the event loop and, once the loop has
    /// stopped, by shutdown()
    state: Arc<watch::Sender<PresenceState>>,
    /// Event loop task
    task: Option<JoinHandle<()>>,
}

impl PresenceCoordinator {
    /// Start a presence session and connect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        workspace_id: impl Into<String>,
        current_user: CurrentUser,
        config: ClientConfig,
    ) -> Self {
        let workspace_id = workspace_id.into();
        let mut client =
            WorkspaceClient::new(workspace_id.clone(), current_user.id.clone(), config);
        let sender = client.sender();
        let (state_tx, _) = watch::channel(PresenceState::new());
        let state = Arc::new(state_tx);
        let local_user = current_user.to_presence_user();

        let task = client.take_event_rx().map(|events| {
            let state = state.clone();
            let sender = sender.clone();
            let workspace_id = workspace_id.clone();
            tokio::spawn(Self::drive(events, state, sender, workspace_id, local_user))
        });

        client.connect();

        Self {
            workspace_id,
            current_user,
            client,
            sender,
            state,
            task,
        }
    }

    /// Subscribe to presence snapshots.
    ///
    /// The receiver yields the current state immediately and changes as
    /// they happen.
    pub fn subscribe(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }

    /// Current set of visible collaborators.
    pub fn users(&self) -> HashMap<String, PresenceUser> {
        self.state.borrow().users.clone()
    }

    /// Whether the transport currently reports an open connection.
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected
    }

    /// Whether the connect handshake completed for the current attempt.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready
    }

    /// Last connection error, if any.
    pub fn connection_error(&self) -> Option<String> {
        self.state.borrow().connection_error.clone()
    }

    /// Report the local cursor position to peers.
    ///
    /// No-op while disconnected; cursor movement is dropped, not
    /// queued.
    pub fn update_cursor(&self, x: f64, y: f64) {
        if !self.sender.is_connected() {
            return;
        }
        self.sender.send(OutboundMessage::cursor_move(
            self.workspace_id.clone(),
            self.current_user.id.clone(),
            x,
            y,
        ));
    }

    /// Ask for a fresh connection cycle.
    ///
    /// Intended for the terminal "maximum reconnection attempts
    /// reached" state; a no-op while the supervisor is still running.
    /// Ignored after [`PresenceCoordinator::shutdown`]: the event loop
    /// is gone, so a revived supervisor would emit into a channel
    /// nobody drains.
    pub fn reconnect(&mut self) {
        let consumer_live = self.task.as_ref().is_some_and(|task| !task.is_finished());
        if !consumer_live {
            log::debug!("reconnect() ignored after shutdown");
            return;
        }
        self.client.connect();
    }

    /// Tear the session down.
    ///
    /// Closes the transport, cancels any pending reconnect, and stops
    /// the event loop; no state changes or sends happen after this
    /// returns. The final snapshot stays readable. Safe to call more
    /// than once.
    pub async fn shutdown(&mut self) {
        self.client.disconnect().await;
        if let Some(task) = self.task.take() {
            // The loop's only await point is the channel recv.
            task.abort();
            let _ = task.await;
        }
        self.state.send_modify(|state| state.mark_disconnected());
    }

    /// Get the workspace id.
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Get the local user.
    pub fn current_user(&self) -> &CurrentUser {
        &self.current_user
    }

    /// Get the underlying client.
    pub fn client(&self) -> &WorkspaceClient {
        &self.client
    }

    /// The event loop: folds client events into the read model and
    /// owns the once-per-generation self-announcement.
    async fn drive(
        mut events: mpsc::Receiver<ClientEvent>,
        state: Arc<watch::Sender<PresenceState>>,
        sender: WorkspaceSender,
        workspace_id: String,
        local_user: PresenceUser,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Connected => {
                    let mut announce = false;
                    state.send_modify(|s| {
                        s.mark_connected();
                        announce = s.should_announce();
                    });
                    if announce {
                        sender.send(OutboundMessage::presence_join(
                            workspace_id.clone(),
                            local_user.clone(),
                        ));
                        state.send_modify(|s| s.record_announced());
                        log::debug!("Announced presence for {}", local_user.id);
                    }
                }
                ClientEvent::Disconnected => {
                    state.send_modify(|s| s.mark_disconnected());
                }
                ClientEvent::Message(message) => {
                    Self::reduce(&state, &message);
                }
                ClientEvent::Error(error) => {
                    state.send_modify(|s| s.connection_error = Some(error));
                }
            }
        }
    }

    /// Apply one inbound message to the read model.
    fn reduce(state: &watch::Sender<PresenceState>, message: &WsMessage) {
        state.send_modify(|s| s.apply(message));
    }
}
