//! Fan-out to the N-1 other members of a room.
//!
//! Every connection owns a bounded outbox (`mpsc`). A room's
//! [`BroadcastGroup`] holds the outbox of each member and pushes messages
//! with `try_send`, so fan-out never waits on a slow peer: a full outbox
//! drops the message for that member only.
//!
//! The group lives inside the room mutex, which makes fan-out order equal to
//! the order in which the room applied its mutations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::protocol::{ServerMessage, User};

/// Identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::Sender<Arc<ServerMessage>>;

/// Receiving half of a connection's outbox.
pub type OutboxReceiver = mpsc::Receiver<Arc<ServerMessage>>;

/// Create a connection outbox holding up to `capacity` undelivered messages.
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_members: usize,
}

struct Member {
    user: User,
    outbox: Outbox,
    /// Join order, used to keep snapshots stable.
    seq: u64,
}

/// Membership of one room plus the means to reach every member.
#[derive(Default)]
pub struct BroadcastGroup {
    members: HashMap<ConnectionId, Member>,
    next_seq: u64,
    messages_sent: u64,
    messages_dropped: u64,
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` as `user`.
    ///
    /// Returns `false` if the connection was already a member; its user and
    /// outbox are refreshed but it keeps its original join position.
    pub fn add_member(&mut self, conn: ConnectionId, user: User, outbox: Outbox) -> bool {
        if let Some(existing) = self.members.get_mut(&conn) {
            existing.user = user;
            existing.outbox = outbox;
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.members.insert(conn, Member { user, outbox, seq });
        true
    }

    /// Remove a connection, returning the user it was registered as.
    pub fn remove_member(&mut self, conn: &ConnectionId) -> Option<User> {
        self.members.remove(conn).map(|m| m.user)
    }

    pub fn is_member(&self, conn: &ConnectionId) -> bool {
        self.members.contains_key(conn)
    }

    /// Whether any connection is registered under `user_id`.
    pub fn has_user(&self, user_id: &str) -> bool {
        self.members.values().any(|m| m.user.id == user_id)
    }

    /// Visible membership: one entry per `user.id`, in join order.
    ///
    /// When several connections share a user id the most recent join wins
    /// the name but the first join keeps the position.
    pub fn users(&self) -> Vec<User> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);

        let mut users: Vec<User> = Vec::with_capacity(members.len());
        for member in members {
            match users.iter_mut().find(|u| u.id == member.user.id) {
                Some(existing) => existing.name = member.user.name.clone(),
                None => users.push(member.user.clone()),
            }
        }
        users
    }

    /// Number of member connections (not de-duplicated).
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Deliver a message to a single member.
    pub fn send_to(&mut self, conn: &ConnectionId, msg: Arc<ServerMessage>) -> bool {
        let Some(member) = self.members.get(conn) else {
            return false;
        };
        let delivered = deliver(conn, &member.outbox, msg);
        self.record(delivered);
        delivered
    }

    /// Broadcast a message to every member except `origin`.
    ///
    /// The message is wrapped once and shared between receivers.
    /// Returns the number of members it was delivered to.
    pub fn broadcast_except(&mut self, origin: &ConnectionId, msg: ServerMessage) -> usize {
        let msg = Arc::new(msg);
        let mut delivered = 0;
        let mut dropped = 0;
        for (conn, member) in &self.members {
            if conn == origin {
                continue;
            }
            if deliver(conn, &member.outbox, msg.clone()) {
                delivered += 1;
            } else {
                dropped += 1;
            }
        }
        self.messages_sent += delivered as u64;
        self.messages_dropped += dropped;
        delivered
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent,
            messages_dropped: self.messages_dropped,
            active_members: self.members.len(),
        }
    }

    fn record(&mut self, delivered: bool) {
        if delivered {
            self.messages_sent += 1;
        } else {
            self.messages_dropped += 1;
        }
    }
}

fn deliver(conn: &ConnectionId, outbox: &Outbox, msg: Arc<ServerMessage>) -> bool {
    match outbox.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(msg)) => {
            log::warn!("Outbox full for {conn}, dropping {}", msg.event_name());
            false
        }
        Err(TrySendError::Closed(_)) => {
            log::debug!("Outbox closed for {conn}");
            false
        }
    }
}
