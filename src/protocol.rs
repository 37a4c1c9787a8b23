//! JSON wire protocol for the workspace presence channel.
//!
//! Wire envelope (JSON text frames):
//! ```text
//! {
//!   "type":        "presence_join" | "presence_leave" | "cursor_move"
//!                  | "chart_update" | "connection_established",
//!   "payload":     { …variant-specific… },
//!   "userId":      "<sender id>",
//!   "workspaceId": "<workspace scope>",
//!   "timestamp":   <ms since epoch>
//! }
//! ```
//!
//! Timestamps are assigned by the sender at send time, never by the
//! receiver. Outbound messages are built as unstamped [`OutboundMessage`]
//! drafts and stamped in the client's send path.
//!
//! Reference: Kleppmann, Chapter 4 — Encoding and Evolution

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// 2D cursor position in workspace canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One collaborator currently present in a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceUser {
    /// Opaque stable identifier, unique per user within a workspace session
    pub id: String,
    /// Display name
    pub name: String,
    /// Avatar image reference (URL or asset path)
    pub avatar: String,
    /// Hex display color, derived deterministically from `id`
    pub color: String,
    /// Last known cursor position; absent until the first cursor_move
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
}

/// Payload for `presence_join`: a user announcing themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceJoinPayload {
    pub user_id: String,
    pub user: PresenceUser,
}

/// Payload for `presence_leave`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceLeavePayload {
    pub user_id: String,
}

/// Payload for `cursor_move`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMovePayload {
    pub user_id: String,
    pub cursor: CursorPosition,
}

/// Payload for `chart_update`.
///
/// Reserved for the chart feature; carried opaquely and ignored by the
/// presence reducers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartUpdatePayload {
    pub chart_id: String,
    pub data: serde_json::Value,
}

/// Payload for the relay's `connection_established` greeting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablishedPayload {
    pub user_id: String,
    pub workspace_id: String,
    pub message: String,
}

/// Kind-specific message payload, discriminated by the wire `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsPayload {
    /// A user announcing presence in the workspace
    PresenceJoin(PresenceJoinPayload),
    /// A user leaving the workspace
    PresenceLeave(PresenceLeavePayload),
    /// Cursor position update
    CursorMove(CursorMovePayload),
    /// Chart data change notification (reserved)
    ChartUpdate(ChartUpdatePayload),
    /// Greeting the relay sends to each client on join
    ConnectionEstablished(ConnectionEstablishedPayload),
}

impl WsPayload {
    /// The wire `type` tag of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PresenceJoin(_) => "presence_join",
            Self::PresenceLeave(_) => "presence_leave",
            Self::CursorMove(_) => "cursor_move",
            Self::ChartUpdate(_) => "chart_update",
            Self::ConnectionEstablished(_) => "connection_established",
        }
    }
}

/// Top-level wire envelope.
///
/// Every frame carries the sender id, the workspace scope, and a
/// sender-assigned timestamp alongside the tagged payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage {
    #[serde(flatten)]
    pub payload: WsPayload,
    pub user_id: String,
    pub workspace_id: String,
    /// Milliseconds since epoch, stamped by the sender at send time
    pub timestamp: u64,
}

impl WsMessage {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// The wire `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// An outbound draft: a wire message without its timestamp.
///
/// The send path stamps drafts at transmission time so the timestamp
/// reflects when the frame left, not when it was built.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub payload: WsPayload,
    pub user_id: String,
    pub workspace_id: String,
}

impl OutboundMessage {
    /// Announce the local user's presence.
    pub fn presence_join(workspace_id: impl Into<String>, user: PresenceUser) -> Self {
        let user_id = user.id.clone();
        Self {
            payload: WsPayload::PresenceJoin(PresenceJoinPayload {
                user_id: user_id.clone(),
                user,
            }),
            user_id,
            workspace_id: workspace_id.into(),
        }
    }

    /// Announce a user leaving the workspace.
    pub fn presence_leave(workspace_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            payload: WsPayload::PresenceLeave(PresenceLeavePayload {
                user_id: user_id.clone(),
            }),
            user_id,
            workspace_id: workspace_id.into(),
        }
    }

    /// Report the local user's cursor position.
    pub fn cursor_move(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        x: f64,
        y: f64,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            payload: WsPayload::CursorMove(CursorMovePayload {
                user_id: user_id.clone(),
                cursor: CursorPosition::new(x, y),
            }),
            user_id,
            workspace_id: workspace_id.into(),
        }
    }

    /// Notify peers that a chart's data changed (reserved).
    pub fn chart_update(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        chart_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            payload: WsPayload::ChartUpdate(ChartUpdatePayload {
                chart_id: chart_id.into(),
                data,
            }),
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
        }
    }

    /// Stamp the draft with the current wall-clock time.
    pub fn stamped(self) -> WsMessage {
        WsMessage {
            payload: self.payload,
            user_id: self.user_id,
            workspace_id: self.workspace_id,
            timestamp: now_millis(),
        }
    }

    /// The wire `type` tag of this draft.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
