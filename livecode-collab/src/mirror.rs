//! Client reconciliation: a tab's local mirror of one room.
//!
//! ```text
//!              join(room)             room:state
//! Disconnected ──────────► JoinedSyncing ──────────► Synced
//!      ▲                        ▲                      │
//!      │ disconnect()           │ join(other room)     │ local_edit / code:update
//!      └────────────────────────┴──────────────────────┘
//! ```
//!
//! Local edits are applied immediately and sent with the version the mirror
//! held before the edit. Inbound `room:state` and `code:update` overwrite the
//! mirror unconditionally: whatever the server broadcast last is the truth,
//! even if it discards a local edit that raced with it.

use std::time::{Instant, SystemTime};

use crate::presence::{CursorState, CursorThrottle, RemoteCursors};
use crate::protocol::{
    ClientMessage, CursorPosition, CursorSelection, RoomId, ServerMessage, User, Version,
};

/// Where the mirror is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Disconnected,
    /// Join sent, snapshot not received yet.
    JoinedSyncing,
    /// Holds a snapshot and may originate edits.
    Synced,
}

/// Per-tab copy of the current room.
#[derive(Debug, Clone)]
pub struct ClientMirror {
    me: User,
    phase: SyncPhase,
    room_id: Option<RoomId>,
    code: String,
    version: Version,
    members: Vec<User>,
    remote_cursors: RemoteCursors,
    throttle: CursorThrottle,
    last_sync: Option<SystemTime>,
}

impl ClientMirror {
    pub fn new(me: User) -> Self {
        Self {
            me,
            phase: SyncPhase::Disconnected,
            room_id: None,
            code: String::new(),
            version: 0,
            members: Vec::new(),
            remote_cursors: RemoteCursors::new(),
            throttle: CursorThrottle::default(),
            last_sync: None,
        }
    }

    /// Use a custom cursor throttle instead of the 50ms default.
    pub fn with_throttle(mut self, throttle: CursorThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Switch to `room_id`, discarding everything known about the previous
    /// room, and return the `room:join` request to send.
    pub fn join(&mut self, room_id: impl Into<RoomId>) -> ClientMessage {
        let room_id = room_id.into();
        self.code.clear();
        self.version = 0;
        self.members.clear();
        self.remote_cursors.clear();
        self.throttle.reset();
        self.room_id = Some(room_id.clone());
        self.phase = SyncPhase::JoinedSyncing;
        ClientMessage::join(room_id, self.me.clone())
    }

    /// Apply a local edit optimistically.
    ///
    /// Returns the `code:change` to send, carrying the pre-edit version, or
    /// `None` if the mirror is not synced yet.
    pub fn local_edit(&mut self, value: impl Into<String>) -> Option<ClientMessage> {
        if self.phase != SyncPhase::Synced {
            return None;
        }
        let room_id = self.room_id.clone()?;
        let value = value.into();
        let client_version = self.version;
        self.code = value.clone();
        self.version = self.version.saturating_add(1);
        Some(ClientMessage::code_change(room_id, value, client_version))
    }

    /// Local caret/selection change. Returns a `cursor:move` unless the
    /// mirror is not synced or the throttle is closed.
    pub fn local_cursor(
        &mut self,
        position: CursorPosition,
        selection: Option<CursorSelection>,
        now: Instant,
    ) -> Option<ClientMessage> {
        if self.phase != SyncPhase::Synced {
            return None;
        }
        let room_id = self.room_id.clone()?;
        if !self.throttle.try_acquire(now) {
            return None;
        }
        Some(ClientMessage::cursor_move(room_id, self.me.clone(), position, selection))
    }

    /// Apply an inbound server message. Returns `false` if it was ignored
    /// (wrong room, not joined, or our own cursor echoed back).
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        if self.phase == SyncPhase::Disconnected {
            return false;
        }
        if self.room_id.as_deref() != Some(msg.room_id()) {
            log::debug!("Ignoring {} for stale room {}", msg.event_name(), msg.room_id());
            return false;
        }

        match msg {
            ServerMessage::RoomJoined(_) => true,
            ServerMessage::RoomState(state) => {
                self.code = state.code.clone();
                self.version = state.version;
                self.members.clear();
                for user in &state.users {
                    self.add_member(user.clone());
                }
                self.remote_cursors.clear();
                self.phase = SyncPhase::Synced;
                self.last_sync = Some(SystemTime::now());
                true
            }
            ServerMessage::UserJoined(p) => {
                self.add_member(p.user.clone());
                true
            }
            ServerMessage::UserLeft(p) => {
                self.members.retain(|u| u.id != p.user.id);
                self.remote_cursors.remove(&p.user.id);
                true
            }
            ServerMessage::CodeUpdate(update) => {
                self.code = update.value.clone();
                self.version = update.version;
                self.last_sync = Some(SystemTime::now());
                true
            }
            ServerMessage::CursorUpdate(p) => {
                if p.user.id == self.me.id {
                    return false;
                }
                self.remote_cursors.upsert(
                    p.user.clone(),
                    CursorState {
                        position: p.position,
                        selection: p.selection,
                    },
                );
                true
            }
        }
    }

    /// Transport lost. The room id is kept so the client can re-join.
    pub fn disconnect(&mut self) {
        self.phase = SyncPhase::Disconnected;
        self.remote_cursors.clear();
    }

    pub fn me(&self) -> &User {
        &self.me
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn members(&self) -> &[User] {
        &self.members
    }

    pub fn remote_cursors(&self) -> &RemoteCursors {
        &self.remote_cursors
    }

    /// When server state was last received.
    pub fn last_sync(&self) -> Option<SystemTime> {
        self.last_sync
    }

    fn add_member(&mut self, user: User) {
        if !self.members.iter().any(|u| u.id == user.id) {
            self.members.push(user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        CodeUpdatePayload, CursorMovePayload, RoomJoinedPayload, RoomStatePayload,
        UserPresencePayload,
    };
    use std::time::Duration;

    fn me() -> User {
        User::new("me", "Me")
    }

    fn state(room: &str, code: &str, version: Version, users: Vec<User>) -> ServerMessage {
        ServerMessage::RoomState(RoomStatePayload {
            room_id: room.into(),
            code: code.into(),
            version,
            users,
        })
    }

    fn code_update(room: &str, value: &str, version: Version) -> ServerMessage {
        ServerMessage::CodeUpdate(CodeUpdatePayload {
            room_id: room.into(),
            value: value.into(),
            version,
        })
    }

    fn cursor(room: &str, user: User, line: u32) -> ServerMessage {
        ServerMessage::CursorUpdate(CursorMovePayload {
            room_id: room.into(),
            user,
            position: CursorPosition::new(line, 1),
            selection: None,
        })
    }

    fn synced(room: &str) -> ClientMirror {
        let mut mirror = ClientMirror::new(me());
        mirror.join(room);
        mirror.apply(&state(room, "// Start Typing...", 1, vec![me()]));
        mirror
    }

    #[test]
    fn test_lifecycle() {
        let mut mirror = ClientMirror::new(me());
        assert_eq!(mirror.phase(), SyncPhase::Disconnected);
        assert!(mirror.local_edit("nope").is_none());

        let join = mirror.join("room-1");
        assert_eq!(join, ClientMessage::join("room-1", me()));
        assert_eq!(mirror.phase(), SyncPhase::JoinedSyncing);
        assert!(mirror.local_edit("too early").is_none());

        assert!(mirror.apply(&ServerMessage::RoomJoined(RoomJoinedPayload {
            room_id: "room-1".into()
        })));
        assert!(mirror.apply(&state("room-1", "seed", 1, vec![me()])));
        assert_eq!(mirror.phase(), SyncPhase::Synced);
        assert_eq!(mirror.code(), "seed");
        assert_eq!(mirror.version(), 1);
        assert!(mirror.last_sync().is_some());

        mirror.disconnect();
        assert_eq!(mirror.phase(), SyncPhase::Disconnected);
        assert_eq!(mirror.room_id(), Some("room-1"));
    }

    #[test]
    fn test_local_edit_sends_pre_increment_version() {
        let mut mirror = synced("r");
        let msg = mirror.local_edit("x=1").unwrap();
        assert_eq!(msg, ClientMessage::code_change("r", "x=1", 1));
        assert_eq!(mirror.version(), 2);
        assert_eq!(mirror.code(), "x=1");

        let msg = mirror.local_edit("x=12").unwrap();
        assert_eq!(msg, ClientMessage::code_change("r", "x=12", 2));
        assert_eq!(mirror.version(), 3);
    }

    #[test]
    fn test_inbound_update_overwrites_local_edit() {
        let mut mirror = synced("r");
        mirror.local_edit("mine");
        assert!(mirror.apply(&code_update("r", "theirs", 2)));
        assert_eq!(mirror.code(), "theirs");
        assert_eq!(mirror.version(), 2);

        // Lower versions still win: overwrite, not compare
        assert!(mirror.apply(&code_update("r", "older", 1)));
        assert_eq!(mirror.version(), 1);
        assert_eq!(mirror.code(), "older");
    }

    #[test]
    fn test_cursor_upsert_and_self_echo() {
        let mut mirror = synced("r");
        let bob = User::new("b", "Bob");

        assert!(mirror.apply(&cursor("r", bob.clone(), 1)));
        assert!(mirror.apply(&cursor("r", bob, 7)));
        assert_eq!(mirror.remote_cursors().len(), 1);
        assert_eq!(
            mirror.remote_cursors().get("b").unwrap().cursor.position,
            CursorPosition::new(7, 1)
        );

        assert!(!mirror.apply(&cursor("r", me(), 3)));
        assert!(mirror.remote_cursors().get("me").is_none());
    }

    #[test]
    fn test_room_switch_discards_cursors_and_ignores_old_room() {
        let mut mirror = synced("one");
        mirror.apply(&cursor("one", User::new("b", "Bob"), 1));
        assert_eq!(mirror.remote_cursors().len(), 1);

        mirror.join("two");
        assert!(mirror.remote_cursors().is_empty());
        assert_eq!(mirror.phase(), SyncPhase::JoinedSyncing);
        assert!(mirror.members().is_empty());

        assert!(!mirror.apply(&code_update("one", "late", 9)));
        assert!(!mirror.apply(&cursor("one", User::new("b", "Bob"), 2)));
        assert!(mirror.remote_cursors().is_empty());
        assert_eq!(mirror.version(), 0);
    }

    #[test]
    fn test_membership_dedup() {
        let mut mirror = ClientMirror::new(me());
        mirror.join("r");
        let bob = User::new("b", "Bob");
        mirror.apply(&state("r", "", 1, vec![me(), bob.clone(), bob.clone()]));
        assert_eq!(mirror.members().len(), 2);

        let joined = ServerMessage::UserJoined(UserPresencePayload {
            room_id: "r".into(),
            user: bob.clone(),
        });
        mirror.apply(&joined);
        assert_eq!(mirror.members().len(), 2);

        mirror.apply(&cursor("r", bob.clone(), 1));
        mirror.apply(&ServerMessage::UserLeft(UserPresencePayload {
            room_id: "r".into(),
            user: bob,
        }));
        assert_eq!(mirror.members(), &[me()]);
        assert!(mirror.remote_cursors().is_empty());
    }

    #[test]
    fn test_local_cursor_throttled() {
        let mut mirror = synced("r");
        let t0 = Instant::now();
        let pos = CursorPosition::new(1, 1);

        let first = mirror.local_cursor(pos, None, t0).unwrap();
        assert_eq!(first, ClientMessage::cursor_move("r", me(), pos, None));
        assert!(mirror.local_cursor(pos, None, t0 + Duration::from_millis(20)).is_none());
        assert!(mirror.local_cursor(pos, None, t0 + Duration::from_millis(50)).is_some());
    }

    #[test]
    fn test_ignored_while_disconnected() {
        let mut mirror = ClientMirror::new(me());
        assert!(!mirror.apply(&code_update("r", "x", 2)));
        assert_eq!(mirror.code(), "");
    }
}
