//! Protocol handling for the sync server, independent of the transport.
//!
//! ```text
//! room:join ──► RoomRegistry::get_or_create ──► Room::join
//!                                                  ├── room:joined, room:state ──► requester
//!                                                  └── user:joined ──────────────► others
//! code:change ──► ConflictPolicy ──► code:update ──► others
//! cursor:move ──────────────────────► cursor:update ─► others   (not stored)
//! disconnect ──► leave every room ──► user:left ────► others
//! ```
//!
//! Every room mutation and the fan-out it causes happen under that room's
//! lock, so all members see updates in the order the room applied them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::broadcast::{ConnectionId, Outbox};
use crate::policy::MembershipPolicy;
use crate::protocol::{
    ClientMessage, CodeChangePayload, CodeUpdatePayload, CursorMovePayload, RoomId,
    RoomJoinPayload, RoomJoinedPayload, ServerMessage, UserPresencePayload, Version,
};
use crate::registry::{MemoryRoomStore, RoomRegistry, RoomStore};

/// The server's view of one transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: Outbox,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub ignored_messages: u64,
    pub rooms: usize,
}

#[derive(Default)]
struct AtomicStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    ignored_messages: AtomicU64,
}

/// Room registry plus per-connection bookkeeping.
pub struct CollabHub<S: RoomStore = MemoryRoomStore> {
    registry: RoomRegistry<S>,
    membership_policy: MembershipPolicy,
    /// Rooms each live connection is a member of.
    memberships: Mutex<HashMap<ConnectionId, Vec<RoomId>>>,
    stats: AtomicStats,
}

impl CollabHub<MemoryRoomStore> {
    pub fn new() -> Self {
        Self::with_registry(RoomRegistry::new(), MembershipPolicy::default())
    }
}

impl Default for CollabHub<MemoryRoomStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RoomStore> CollabHub<S> {
    pub fn with_registry(registry: RoomRegistry<S>, membership_policy: MembershipPolicy) -> Self {
        Self {
            registry,
            membership_policy,
            memberships: Mutex::new(HashMap::new()),
            stats: AtomicStats::default(),
        }
    }

    pub fn registry(&self) -> &RoomRegistry<S> {
        &self.registry
    }

    /// Register a new transport connection delivering through `outbox`.
    pub async fn connect(&self, outbox: Outbox) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: ConnectionId::new(),
            outbox,
        };
        self.memberships.lock().await.insert(handle.id, Vec::new());
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Route one inbound message.
    pub async fn dispatch(&self, conn: &ConnectionHandle, msg: ClientMessage) {
        self.stats.total_messages.fetch_add(1, Ordering::Relaxed);
        match msg {
            ClientMessage::RoomJoin(payload) => self.join(conn, payload).await,
            ClientMessage::CodeChange(payload) => {
                self.change_code(conn, payload).await;
            }
            ClientMessage::CursorMove(payload) => {
                self.move_cursor(conn, payload).await;
            }
        }
    }

    /// `room:join`: attach the connection, reply with `room:joined` and a
    /// full `room:state`, announce the user to the others.
    pub async fn join(&self, conn: &ConnectionHandle, payload: RoomJoinPayload) {
        let RoomJoinPayload { room_id, user } = payload;

        let stale = {
            let mut memberships = self.memberships.lock().await;
            let rooms = memberships.entry(conn.id).or_default();
            let stale = match self.membership_policy {
                MembershipPolicy::LeaveOnSwitch => {
                    let (keep, stale): (Vec<RoomId>, Vec<RoomId>) =
                        rooms.drain(..).partition(|r| *r == room_id);
                    *rooms = keep;
                    stale
                }
                MembershipPolicy::Accumulate => Vec::new(),
            };
            if !rooms.contains(&room_id) {
                rooms.push(room_id.clone());
            }
            stale
        };
        for old in stale {
            self.leave_room(conn.id, &old).await;
        }

        let room = self.registry.get_or_create(&room_id).await;
        let mut room = room.lock().await;
        let is_new_user = room.join(conn.id, user.clone(), conn.outbox.clone());

        room.members_mut().send_to(
            &conn.id,
            Arc::new(ServerMessage::RoomJoined(RoomJoinedPayload {
                room_id: room_id.clone(),
            })),
        );
        let snapshot = room.snapshot();
        let user_count = snapshot.users.len();
        room.members_mut()
            .send_to(&conn.id, Arc::new(ServerMessage::RoomState(snapshot)));

        if is_new_user {
            room.members_mut().broadcast_except(
                &conn.id,
                ServerMessage::UserJoined(UserPresencePayload {
                    room_id: room_id.clone(),
                    user: user.clone(),
                }),
            );
        }

        log::info!(
            "User {} ({}) joined room {room_id} via {} ({user_count} users)",
            user.name,
            user.id,
            conn.id
        );
    }

    /// `code:change`: apply through the room's conflict policy and fan out.
    ///
    /// Unknown rooms are ignored. Returns the stored version when applied.
    pub async fn change_code(&self, conn: &ConnectionHandle, payload: CodeChangePayload) -> Option<Version> {
        let CodeChangePayload {
            room_id,
            value,
            client_version,
        } = payload;

        let Some(room) = self.registry.get(&room_id).await else {
            self.stats.ignored_messages.fetch_add(1, Ordering::Relaxed);
            log::trace!("code:change for unknown room {room_id} ignored");
            return None;
        };

        let mut room = room.lock().await;
        let version = room.apply_change(value.clone(), client_version)?;
        let delivered = room.members_mut().broadcast_except(
            &conn.id,
            ServerMessage::CodeUpdate(CodeUpdatePayload {
                room_id: room_id.clone(),
                value,
                version,
            }),
        );
        log::debug!("Room {room_id} now at version {version} (claimed {client_version}, {delivered} peers)");
        Some(version)
    }

    /// `cursor:move`: relay to the other members of the room. Nothing is stored.
    ///
    /// Returns the number of members the update was delivered to.
    pub async fn move_cursor(&self, conn: &ConnectionHandle, payload: CursorMovePayload) -> usize {
        let Some(room) = self.registry.get(&payload.room_id).await else {
            self.stats.ignored_messages.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        log::trace!("Cursor update from {} in room {}", payload.user.id, payload.room_id);
        let mut room = room.lock().await;
        room.members_mut()
            .broadcast_except(&conn.id, ServerMessage::CursorUpdate(payload))
    }

    /// Transport-level disconnect: drop every membership of the connection.
    pub async fn disconnect(&self, conn: &ConnectionHandle) {
        let rooms = self.memberships.lock().await.remove(&conn.id);
        let Some(rooms) = rooms else {
            return;
        };
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        for room_id in rooms {
            self.leave_room(conn.id, &room_id).await;
        }
    }

    /// Rooms the connection is currently a member of.
    pub async fn rooms_of(&self, conn: &ConnectionHandle) -> Vec<RoomId> {
        self.memberships
            .lock()
            .await
            .get(&conn.id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            total_messages: self.stats.total_messages.load(Ordering::Relaxed),
            ignored_messages: self.stats.ignored_messages.load(Ordering::Relaxed),
            rooms: self.registry.room_count().await,
        }
    }

    async fn leave_room(&self, conn: ConnectionId, room_id: &str) {
        let Some(room) = self.registry.get(room_id).await else {
            return;
        };
        let mut room = room.lock().await;
        let members = room.members_mut();
        let Some(user) = members.remove_member(&conn) else {
            return;
        };
        if !members.has_user(&user.id) {
            members.broadcast_except(
                &conn,
                ServerMessage::UserLeft(UserPresencePayload {
                    room_id: room_id.to_string(),
                    user: user.clone(),
                }),
            );
        }
        log::info!("User {} ({}) left room {room_id}", user.name, user.id);
    }
}
