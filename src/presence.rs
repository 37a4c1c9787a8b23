//! Presence state for "who's in this workspace" tracking.
//!
//! Pure state: reducers fold the inbound event stream into a user map,
//! connection flags gate the one-time self-announcement, and the color
//! function derives a stable cursor/avatar color from a user id. All
//! side-effect wiring lives in [`crate::coordinator`].
//!
//! ## Reducer semantics
//!
//! | event | effect |
//! |-------|--------|
//! | `presence_join` | insert/overwrite the sender's entry |
//! | `presence_leave` | remove the sender's entry if present |
//! | `cursor_move` | overwrite the cursor of a known sender |
//! | `chart_update` | ignored (reserved) |
//! | `connection_established` | ignored (relay greeting) |
//!
//! Reducers are idempotent so duplicate or out-of-order delivery across
//! reconnects cannot corrupt the map.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::collections::HashMap;

use crate::protocol::{PresenceUser, WsMessage, WsPayload};

// ───────────────────────────────────────────────────────────────────
// Deterministic user colors
// ───────────────────────────────────────────────────────────────────

/// Fixed cursor/avatar palette, indexed by the id hash.
pub const USER_COLORS: [&str; 8] = [
    "#EF4444", "#F59E0B", "#10B981", "#3B82F6",
    "#8B5CF6", "#EC4899", "#06B6D4", "#F97316",
];

/// Deterministic display color for a user id.
///
/// Accumulates `code + ((hash << 5) - hash)` over the id's UTF-16 code
/// units, then indexes the palette by `|hash| % 8`. Only the shift
/// operand truncates to 32 bits; the accumulator keeps full precision,
/// which matters for anything longer than a handful of characters
/// (backend-minted ids are 36-char UUIDs). Pure: same id ⇒ same color
/// on every participant, independent of message order or reconnects.
pub fn user_color(user_id: &str) -> &'static str {
    let mut hash: i64 = 0;
    for code in user_id.encode_utf16() {
        let shifted = ((hash as i32).wrapping_shl(5)) as i64;
        hash = i64::from(code) + (shifted - hash);
    }
    let index = hash.unsigned_abs() as usize % USER_COLORS.len();
    USER_COLORS[index]
}

// ───────────────────────────────────────────────────────────────────
// Presence state
// ───────────────────────────────────────────────────────────────────

/// Live presence view for one workspace session.
///
/// Owned and mutated by a single coordinator event loop; exposed to the
/// UI as watch-channel snapshots.
#[derive(Debug, Clone, Default)]
pub struct PresenceState {
    /// Collaborators currently believed present, keyed by user id
    pub users: HashMap<String, PresenceUser>,
    /// True only while the transport reports an open connection
    pub is_connected: bool,
    /// True once the connect handshake completed for the current attempt
    pub is_ready: bool,
    /// Last connection error, cleared on successful (re)connection
    pub connection_error: Option<String>,
    /// Physical connection generation, incremented per successful open
    generation: u64,
    /// Generation for which the self-announcement was already sent
    announced_generation: u64,
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one inbound message to the user map.
    pub fn apply(&mut self, message: &WsMessage) {
        match &message.payload {
            WsPayload::PresenceJoin(p) => {
                self.users.insert(p.user_id.clone(), p.user.clone());
            }
            WsPayload::PresenceLeave(p) => {
                self.users.remove(&p.user_id);
            }
            WsPayload::CursorMove(p) => {
                // Cursor updates never materialize a user
                if let Some(user) = self.users.get_mut(&p.user_id) {
                    user.cursor = Some(p.cursor);
                }
            }
            // Reserved for the chart feature
            WsPayload::ChartUpdate(_) => {}
            // Relay greeting, carries no presence
            WsPayload::ConnectionEstablished(_) => {}
        }
    }

    /// Record a successful transport open: a new connection generation.
    pub fn mark_connected(&mut self) {
        self.generation += 1;
        self.is_connected = true;
        self.is_ready = true;
        self.connection_error = None;
    }

    /// Record a transport close.
    ///
    /// The user map is left untouched: peers are not assumed gone merely
    /// because the local transport dropped.
    pub fn mark_disconnected(&mut self) {
        self.is_connected = false;
        self.is_ready = false;
    }

    /// Whether the self-announcement is still owed for the current
    /// connection generation.
    pub fn should_announce(&self) -> bool {
        self.is_ready && self.announced_generation != self.generation
    }

    /// Mark the current generation as announced.
    pub fn record_announced(&mut self) {
        self.announced_generation = self.generation;
    }

    /// Current connection generation (0 before the first successful open).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look up a user by id.
    pub fn user(&self, user_id: &str) -> Option<&PresenceUser> {
        self.users.get(user_id)
    }

    /// Number of users currently tracked.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutboundMessage;

    fn user(id: &str, name: &str, color: &str) -> PresenceUser {
        PresenceUser {
            id: id.to_string(),
            name: name.to_string(),
            avatar: format!("{name}.png"),
            color: color.to_string(),
            cursor: None,
        }
    }

    fn join(id: &str, name: &str, color: &str) -> WsMessage {
        OutboundMessage::presence_join("ws-1", user(id, name, color)).stamped()
    }

    fn leave(id: &str) -> WsMessage {
        OutboundMessage::presence_leave("ws-1", id).stamped()
    }

    fn cursor(id: &str, x: f64, y: f64) -> WsMessage {
        OutboundMessage::cursor_move("ws-1", id, x, y).stamped()
    }

    // ── Color derivation ─────────────────────────────────────────

    #[test]
    fn test_user_color_deterministic() {
        assert_eq!(user_color("user-42"), user_color("user-42"));
        assert_eq!(user_color("alice"), user_color("alice"));
    }

    #[test]
    fn test_user_color_known_values() {
        // Hand-computed against the hash accumulation.
        assert_eq!(user_color("user-42"), "#EF4444");
        assert_eq!(user_color("user-1"), "#F59E0B");
        assert_eq!(user_color("u2"), "#EC4899");
    }

    #[test]
    fn test_user_color_uuid_id() {
        // Backend-minted id shape. The accumulator leaves 32-bit range
        // well before 36 characters; only the shift operand truncates.
        assert_eq!(
            user_color("d23f0824-128b-4f33-8c5c-7fd0a6a3a450"),
            "#F59E0B"
        );
    }

    #[test]
    fn test_user_color_empty_id() {
        assert_eq!(user_color(""), USER_COLORS[0]);
    }

    #[test]
    fn test_user_color_always_in_palette() {
        for id in ["a", "user-7", "long-identifier-string", "日本語"] {
            assert!(USER_COLORS.contains(&user_color(id)));
        }
    }

    #[test]
    fn test_palette_size() {
        assert_eq!(USER_COLORS.len(), 8);
    }

    // ── Reducers ─────────────────────────────────────────────────

    #[test]
    fn test_join_inserts_user() {
        let mut state = PresenceState::new();
        state.apply(&join("u1", "Alice", "#3B82F6"));

        assert_eq!(state.user_count(), 1);
        assert_eq!(state.user("u1").unwrap().name, "Alice");
    }

    #[test]
    fn test_join_twice_is_idempotent() {
        let mut state = PresenceState::new();
        let msg = join("u1", "Alice", "#3B82F6");
        state.apply(&msg);
        state.apply(&msg);

        assert_eq!(state.user_count(), 1);
        assert_eq!(state.user("u1"), Some(&user("u1", "Alice", "#3B82F6")));
    }

    #[test]
    fn test_join_overwrites_existing() {
        let mut state = PresenceState::new();
        state.apply(&join("u1", "Alice", "#3B82F6"));
        state.apply(&join("u1", "Alicia", "#3B82F6"));

        assert_eq!(state.user_count(), 1);
        assert_eq!(state.user("u1").unwrap().name, "Alicia");
    }

    #[test]
    fn test_join_keeps_payload_color() {
        // The announced color wins over local derivation.
        let mut state = PresenceState::new();
        state.apply(&join("u2", "Bea", "#EF4444"));

        assert_eq!(state.user("u2").unwrap().color, "#EF4444");
    }

    #[test]
    fn test_leave_removes_user() {
        let mut state = PresenceState::new();
        state.apply(&join("u1", "Alice", "#3B82F6"));
        state.apply(&leave("u1"));

        assert_eq!(state.user_count(), 0);
    }

    #[test]
    fn test_leave_absent_is_noop() {
        let mut state = PresenceState::new();
        state.apply(&join("u1", "Alice", "#3B82F6"));
        state.apply(&leave("u9"));

        assert_eq!(state.user_count(), 1);
        assert!(state.user("u1").is_some());
    }

    #[test]
    fn test_join_leave_round_trip() {
        let mut state = PresenceState::new();
        state.apply(&join("u2", "Bea", "#EF4444"));
        assert!(state.user("u2").is_some());

        state.apply(&leave("u2"));
        assert!(state.user("u2").is_none());
    }

    #[test]
    fn test_cursor_move_overwrites() {
        let mut state = PresenceState::new();
        state.apply(&join("u2", "Bea", "#EF4444"));
        assert!(state.user("u2").unwrap().cursor.is_none());

        state.apply(&cursor("u2", 5.0, 9.0));
        let pos = state.user("u2").unwrap().cursor.unwrap();
        assert_eq!((pos.x, pos.y), (5.0, 9.0));

        // Overwritten, not merged.
        state.apply(&cursor("u2", 1.0, 1.0));
        let pos = state.user("u2").unwrap().cursor.unwrap();
        assert_eq!((pos.x, pos.y), (1.0, 1.0));
    }

    #[test]
    fn test_cursor_move_unknown_user_ignored() {
        let mut state = PresenceState::new();
        state.apply(&cursor("ghost", 3.0, 4.0));

        assert_eq!(state.user_count(), 0);
    }

    #[test]
    fn test_cursor_move_preserves_other_fields() {
        let mut state = PresenceState::new();
        state.apply(&join("u1", "Alice", "#3B82F6"));
        state.apply(&cursor("u1", 7.0, 8.0));

        let u = state.user("u1").unwrap();
        assert_eq!(u.name, "Alice");
        assert_eq!(u.avatar, "Alice.png");
        assert_eq!(u.color, "#3B82F6");
    }

    #[test]
    fn test_chart_update_ignored() {
        let mut state = PresenceState::new();
        let msg = OutboundMessage::chart_update("ws-1", "u1", "c1", serde_json::json!({"v": 1}))
            .stamped();
        state.apply(&msg);

        assert_eq!(state.user_count(), 0);
    }

    #[test]
    fn test_connection_established_ignored() {
        let mut state = PresenceState::new();
        let text = r#"{
            "type": "connection_established",
            "payload": {"userId": "u1", "workspaceId": "ws-1", "message": "Connected successfully"},
            "userId": "system",
            "workspaceId": "ws-1",
            "timestamp": 1
        }"#;
        state.apply(&WsMessage::decode(text).unwrap());

        assert_eq!(state.user_count(), 0);
        assert!(state.user("system").is_none());
    }

    // ── Connection flags and announcement guard ──────────────────

    #[test]
    fn test_initial_state() {
        let state = PresenceState::new();
        assert!(!state.is_connected);
        assert!(!state.is_ready);
        assert!(state.connection_error.is_none());
        assert_eq!(state.generation(), 0);
        assert!(!state.should_announce());
    }

    #[test]
    fn test_mark_connected_sets_flags() {
        let mut state = PresenceState::new();
        state.mark_connected();

        assert!(state.is_connected);
        assert!(state.is_ready);
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn test_mark_connected_clears_error() {
        let mut state = PresenceState::new();
        state.connection_error = Some("Connection failed".to_string());
        state.mark_connected();

        assert!(state.connection_error.is_none());
    }

    #[test]
    fn test_mark_disconnected_preserves_users() {
        let mut state = PresenceState::new();
        state.mark_connected();
        state.apply(&join("u1", "Alice", "#3B82F6"));
        state.mark_disconnected();

        assert!(!state.is_connected);
        assert!(!state.is_ready);
        assert_eq!(state.user_count(), 1);
    }

    #[test]
    fn test_announce_once_per_generation() {
        let mut state = PresenceState::new();
        state.mark_connected();

        // Repeated guard evaluations before recording all agree.
        assert!(state.should_announce());
        assert!(state.should_announce());

        state.record_announced();
        for _ in 0..5 {
            assert!(!state.should_announce());
        }
    }

    #[test]
    fn test_announce_allowed_again_after_reconnect() {
        let mut state = PresenceState::new();
        state.mark_connected();
        state.record_announced();
        assert!(!state.should_announce());

        state.mark_disconnected();
        assert!(!state.should_announce());

        // New physical connection: one more announcement owed.
        state.mark_connected();
        assert_eq!(state.generation(), 2);
        assert!(state.should_announce());
        state.record_announced();
        assert!(!state.should_announce());
    }

    #[test]
    fn test_no_announce_while_not_ready() {
        let mut state = PresenceState::new();
        state.mark_connected();
        state.mark_disconnected();

        // Generation is ahead of the announced marker, but not ready.
        assert!(!state.should_announce());
    }
}
