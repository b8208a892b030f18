//! Authoritative per-room state.
//!
//! A [`Room`] keeps its durable part (the [`Document`]: body and version,
//! kept for the process lifetime) apart from its membership (the
//! [`BroadcastGroup`], which changes with every join and disconnect).
//! Cursor traffic never touches either; it is relayed through the group
//! without being stored.

use crate::broadcast::{BroadcastGroup, ConnectionId, Outbox};
use crate::policy::ConflictPolicy;
use crate::protocol::{RoomId, RoomStatePayload, User, Version};

/// Placeholder body of a freshly created room.
pub const SEED_DOCUMENT: &str = "// Start Typing...";

/// Version of a freshly created room.
pub const INITIAL_VERSION: Version = 1;

/// Full document body and its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub code: String,
    pub version: Version,
}

impl Document {
    pub fn seeded(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            version: INITIAL_VERSION,
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::seeded(SEED_DOCUMENT)
    }
}

/// One collaborative session.
pub struct Room {
    id: RoomId,
    document: Document,
    policy: ConflictPolicy,
    members: BroadcastGroup,
}

impl Room {
    pub fn new(id: impl Into<RoomId>, document: Document, policy: ConflictPolicy) -> Self {
        Self {
            id: id.into(),
            document,
            policy,
            members: BroadcastGroup::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn code(&self) -> &str {
        &self.document.code
    }

    pub fn version(&self) -> Version {
        self.document.version
    }

    pub fn members(&self) -> &BroadcastGroup {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut BroadcastGroup {
        &mut self.members
    }

    /// Apply an inbound `code:change` through the room's conflict policy.
    ///
    /// Returns the stored version, or `None` if the policy rejected it.
    pub fn apply_change(&mut self, value: String, client_version: Version) -> Option<Version> {
        let version = self.policy.resolve(self.document.version, client_version)?;
        self.document.code = value;
        self.document.version = version;
        Some(version)
    }

    /// Register a connection. Returns `true` when `user.id` was not yet
    /// present in the room, i.e. other members should hear about it.
    pub fn join(&mut self, conn: ConnectionId, user: User, outbox: Outbox) -> bool {
        let is_new_user = !self.members.has_user(&user.id);
        self.members.add_member(conn, user, outbox);
        is_new_user
    }

    /// Full snapshot reflecting membership at the time of the call.
    pub fn snapshot(&self) -> RoomStatePayload {
        RoomStatePayload {
            room_id: self.id.clone(),
            code: self.document.code.clone(),
            version: self.document.version,
            users: self.members.users(),
        }
    }
}
