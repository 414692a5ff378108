//! Wire types shared by both transports.
//!
//! The polling endpoint answers with a [`PollEnvelope`]; the streaming
//! endpoint emits named messages whose names belong to the closed
//! [`EventKind`] set. Both paths produce a [`Handshake`] exactly once per
//! connection and a sequence of `(name, data)` pairs for subscribers.
//!
//! Field names follow the server's camelCase JSON. The server historically
//! keyed feeds by `playerId`, which is accepted as an alias for `identity`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::ids::Identity;

// ─────────────────────────────────────────────────────────────────────────────
// Event names
// ─────────────────────────────────────────────────────────────────────────────

/// Recognized event names on the streaming endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Handshake carrying `{identity, lastEventId}`.
    Connected,
    /// Initial state snapshot pushed after login.
    Welcome,
    /// Direct message.
    Message,
    /// Direct message read receipt.
    Read,
    /// Presence change.
    Presence,
    /// Player moved to another room.
    RoomChanged,
    /// Privacy preferences changed.
    PrivacyUpdated,
    /// Incoming friend request.
    FriendRequest,
    /// Answer to an outgoing friend request.
    FriendResponse,
    /// Friend request withdrawn.
    FriendCancelled,
    /// Friendship removed.
    FriendRemoved,
    /// Group chat message.
    GroupMessage,
    /// Member joined a group.
    GroupMemberAdded,
    /// Member left or was removed from a group.
    GroupMemberRemoved,
    /// Group metadata changed.
    GroupUpdated,
    /// Group deleted.
    GroupDeleted,
    /// Member role changed.
    GroupRoleChanged,
    /// Group read receipt.
    GroupRead,
}

impl EventKind {
    /// Every recognized kind, handshake first.
    pub const ALL: [Self; 18] = [
        Self::Connected,
        Self::Welcome,
        Self::Message,
        Self::Read,
        Self::Presence,
        Self::RoomChanged,
        Self::PrivacyUpdated,
        Self::FriendRequest,
        Self::FriendResponse,
        Self::FriendCancelled,
        Self::FriendRemoved,
        Self::GroupMessage,
        Self::GroupMemberAdded,
        Self::GroupMemberRemoved,
        Self::GroupUpdated,
        Self::GroupDeleted,
        Self::GroupRoleChanged,
        Self::GroupRead,
    ];

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Welcome => "welcome",
            Self::Message => "message",
            Self::Read => "read",
            Self::Presence => "presence",
            Self::RoomChanged => "room_changed",
            Self::PrivacyUpdated => "privacy_updated",
            Self::FriendRequest => "friend_request",
            Self::FriendResponse => "friend_response",
            Self::FriendCancelled => "friend_cancelled",
            Self::FriendRemoved => "friend_removed",
            Self::GroupMessage => "group_message",
            Self::GroupMemberAdded => "group_member_added",
            Self::GroupMemberRemoved => "group_member_removed",
            Self::GroupUpdated => "group_updated",
            Self::GroupDeleted => "group_deleted",
            Self::GroupRoleChanged => "group_role_changed",
            Self::GroupRead => "group_read",
        }
    }

    /// Look up a kind by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Whether this kind carries the connection handshake.
    pub fn is_handshake(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// One-time "connection established" notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Identity the server bound the feed to.
    pub identity: Identity,
    /// Server-side cursor at handshake time, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<u64>,
    /// Server process session, used to spot restarts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_session_id: Option<String>,
}

impl Handshake {
    /// Build a handshake from a streaming `connected` payload.
    ///
    /// Missing or mistyped fields fall back to `fallback` / `None`; a payload
    /// that is not an object yields a handshake for `fallback`.
    pub fn from_stream_payload(fallback: &Identity, payload: &Value) -> Self {
        let identity = payload
            .get("identity")
            .or_else(|| payload.get("playerId"))
            .and_then(Value::as_str)
            .map_or_else(|| fallback.clone(), Identity::from);
        let cursor = payload.get("lastEventId").and_then(value_as_cursor);
        let server_session_id = payload
            .get("serverSessionId")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Self {
            identity,
            cursor,
            server_session_id,
        }
    }
}

/// Interpret a JSON number (or numeric string) as a cursor value.
fn value_as_cursor(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// One server-originated event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    /// Monotonic id (present in polling mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Event name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
    /// Server timestamp.
    #[serde(default, rename = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Poll envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Body of a successful long-poll response.
///
/// Events are kept as raw JSON so that one malformed entry does not reject
/// the whole envelope; see [`PollEnvelope::decode_events`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollEnvelope {
    /// Identity the server answered for.
    #[serde(alias = "playerId")]
    pub identity: Identity,
    /// Highest event id known to the server for this feed.
    #[serde(default)]
    pub last_event_id: Option<u64>,
    /// Server process session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_session_id: Option<String>,
    /// Events newer than the requested cursor, oldest first.
    #[serde(default)]
    pub events: Vec<Value>,
}

impl PollEnvelope {
    /// Handshake derived from this envelope.
    pub fn handshake(&self) -> Handshake {
        Handshake {
            identity: self.identity.clone(),
            cursor: self.last_event_id,
            server_session_id: self.server_session_id.clone(),
        }
    }

    /// Decode the events in server order, skipping entries without a
    /// string `type`.
    pub fn decode_events(&self) -> Vec<FeedEvent> {
        self.events
            .iter()
            .filter_map(|raw| match serde_json::from_value::<FeedEvent>(raw.clone()) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "skipping malformed poll event");
                    None
                }
            })
            .collect()
    }
}
