//! JSON event protocol shared by the sync server and its clients.
//!
//! Wire format (one WebSocket text frame per message):
//! ```text
//! {"event": "code:change", "data": {"roomId": "room-1", "value": "x=1", "clientVersion": 1}}
//! ```
//!
//! Event names and payload field names are the wire contract; Rust field
//! names are mapped to camelCase by serde.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Room identifier. Client-supplied or produced by [`generate_room_id`].
pub type RoomId = String;

/// Document generation counter within a room.
pub type Version = u64;

/// A participant. `id` is generated by the client, once per tab/session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Fresh identity for a new tab: random UUID and a `User-<n>` display name.
    pub fn anonymous() -> Self {
        let id = uuid::Uuid::new_v4();
        let suffix = (id.as_u128() % 1000) as u16;
        Self {
            id: id.to_string(),
            name: format!("User-{suffix}"),
        }
    }
}

/// Caret position, 1-based like the editing widget reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line_number: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line_number: u32, column: u32) -> Self {
        Self { line_number, column }
    }
}

/// Selected range. Coordinates are never validated against the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorSelection {
    pub start_line_number: u32,
    pub start_column: u32,
    pub end_line_number: u32,
    pub end_column: u32,
}

impl CursorSelection {
    /// True when start and end coincide (a bare caret).
    pub fn is_empty(&self) -> bool {
        self.start_line_number == self.end_line_number && self.start_column == self.end_column
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinPayload {
    pub room_id: RoomId,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedPayload {
    pub room_id: RoomId,
}

/// Full snapshot of a room, sent to a joining client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatePayload {
    pub room_id: RoomId,
    pub code: String,
    pub version: Version,
    pub users: Vec<User>,
}

/// Membership change notification (`user:joined` / `user:left`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresencePayload {
    pub room_id: RoomId,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChangePayload {
    pub room_id: RoomId,
    pub value: String,
    pub client_version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdatePayload {
    pub room_id: RoomId,
    pub value: String,
    pub version: Version,
}

/// Used unchanged for both `cursor:move` and `cursor:update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMovePayload {
    pub room_id: RoomId,
    pub user: User,
    pub position: CursorPosition,
    pub selection: Option<CursorSelection>,
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "room:join")]
    RoomJoin(RoomJoinPayload),
    #[serde(rename = "code:change")]
    CodeChange(CodeChangePayload),
    #[serde(rename = "cursor:move")]
    CursorMove(CursorMovePayload),
}

impl ClientMessage {
    pub fn join(room_id: impl Into<RoomId>, user: User) -> Self {
        Self::RoomJoin(RoomJoinPayload {
            room_id: room_id.into(),
            user,
        })
    }

    pub fn code_change(room_id: impl Into<RoomId>, value: impl Into<String>, client_version: Version) -> Self {
        Self::CodeChange(CodeChangePayload {
            room_id: room_id.into(),
            value: value.into(),
            client_version,
        })
    }

    pub fn cursor_move(
        room_id: impl Into<RoomId>,
        user: User,
        position: CursorPosition,
        selection: Option<CursorSelection>,
    ) -> Self {
        Self::CursorMove(CursorMovePayload {
            room_id: room_id.into(),
            user,
            position,
            selection,
        })
    }

    /// Wire name of this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RoomJoin(_) => "room:join",
            Self::CodeChange(_) => "code:change",
            Self::CursorMove(_) => "cursor:move",
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            Self::RoomJoin(p) => &p.room_id,
            Self::CodeChange(p) => &p.room_id,
            Self::CursorMove(p) => &p.room_id,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "room:joined")]
    RoomJoined(RoomJoinedPayload),
    #[serde(rename = "room:state")]
    RoomState(RoomStatePayload),
    #[serde(rename = "user:joined")]
    UserJoined(UserPresencePayload),
    #[serde(rename = "user:left")]
    UserLeft(UserPresencePayload),
    #[serde(rename = "code:update")]
    CodeUpdate(CodeUpdatePayload),
    #[serde(rename = "cursor:update")]
    CursorUpdate(CursorMovePayload),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RoomJoined(_) => "room:joined",
            Self::RoomState(_) => "room:state",
            Self::UserJoined(_) => "user:joined",
            Self::UserLeft(_) => "user:left",
            Self::CodeUpdate(_) => "code:update",
            Self::CursorUpdate(_) => "cursor:update",
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            Self::RoomJoined(p) => &p.room_id,
            Self::RoomState(p) => &p.room_id,
            Self::UserJoined(p) | Self::UserLeft(p) => &p.room_id,
            Self::CodeUpdate(p) => &p.room_id,
            Self::CursorUpdate(p) => &p.room_id,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Room id for the "create room" action: `room-<unix millis>`.
pub fn generate_room_id(now: SystemTime) -> RoomId {
    let millis = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("room-{millis}")
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    NotJoined,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotJoined => write!(f, "Not joined to a room"),
        }
    }
}

impl std::error::Error for ProtocolError {}
