//! # livecode-collab: Room synchronization for live shared code editing
//!
//! Several clients edit one shared document per room and see each other's
//! cursors. The document body is resolved last-write-wins; cursors are an
//! unversioned side channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    WebSocket (JSON)    ┌──────────────┐
//! │ SyncClient   │ ◄────────────────────► │ SyncServer   │
//! │ (per tab)    │   room:* code:* cursor:*│ (central)    │
//! └──────┬───────┘                        └──────┬───────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌──────────────┐                        ┌──────────────┐
//! │ ClientMirror │                        │ CollabHub    │
//! │ + Remote-    │                        │ RoomRegistry │
//! │   Cursors    │                        └──────┬───────┘
//! └──────────────┘                               │
//!                                         ┌──────┴───────┐
//!                                         │ Room         │
//!                                         │ ├ Document   │
//!                                         │ └ Broadcast- │
//!                                         │   Group      │
//!                                         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON event protocol (`room:join`, `code:change`, ...)
//! - [`policy`]: conflict and membership policies
//! - [`room`]: authoritative document + membership of one room
//! - [`registry`]: process-wide room registry over an injectable store
//! - [`broadcast`]: fan-out to the other members of a room
//! - [`hub`]: transport-free protocol handling
//! - [`server`]: WebSocket server
//! - [`mirror`]: client reconciliation state machine
//! - [`presence`]: remote cursors, throttling, user colours
//! - [`client`]: WebSocket client

pub mod protocol;
pub mod policy;
pub mod room;
pub mod registry;
pub mod broadcast;
pub mod hub;
pub mod server;
pub mod mirror;
pub mod presence;
pub mod client;

// Re-exports for convenience
pub use protocol::{
    ClientMessage, CursorPosition, CursorSelection, ProtocolError, RoomId, ServerMessage, User,
    Version, generate_room_id,
};
pub use policy::{ConflictPolicy, MembershipPolicy};
pub use room::{Document, Room, SEED_DOCUMENT};
pub use registry::{MemoryRoomStore, RoomRegistry, RoomStore, SharedRoom};
pub use broadcast::{BroadcastGroup, BroadcastStats, ConnectionId};
pub use hub::{CollabHub, ConnectionHandle, ServerStats};
pub use server::{ConfigError, ServerConfig, SyncServer};
pub use mirror::{ClientMirror, SyncPhase};
pub use presence::{
    CursorState, CursorThrottle, Decoration, DecorationKind, RemoteCursors, UserColor, initials,
};
pub use client::{ConnectionState, SyncClient, SyncEvent};
