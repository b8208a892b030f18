//! Server-side policies: how concurrent edits are resolved and how
//! connection membership is cleaned up.

use crate::protocol::Version;

/// Conflict resolution applied to every inbound `code:change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The most recently received update replaces the document. The new
    /// version is derived from the sender's claimed version; the stored
    /// version is not consulted.
    #[default]
    LastWriteWins,
}

impl ConflictPolicy {
    /// Version to store after accepting an update claimed at `client_version`.
    ///
    /// Returns `None` if the update must be rejected. `LastWriteWins` never
    /// rejects.
    pub fn resolve(&self, _stored_version: Version, client_version: Version) -> Option<Version> {
        match self {
            ConflictPolicy::LastWriteWins => Some(client_version.saturating_add(1)),
        }
    }
}

/// What happens to a connection's existing memberships when it joins
/// another room. Disconnect always drops every membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipPolicy {
    /// A connection is a member of at most one room; joining a new room
    /// leaves the previous one.
    #[default]
    LeaveOnSwitch,
    /// Previous memberships are kept until disconnect.
    Accumulate,
}
