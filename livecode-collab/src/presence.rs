//! Client-side presence: remote cursors, emission throttling and the
//! per-user colours used to draw them.
//!
//! ## Data flow
//!
//! ```text
//! Local caret move
//!       │
//!       ▼
//! CursorThrottle::try_acquire()   (at most one emission per 50ms)
//!       │
//!       ▼
//! cursor:move ──► server ──► cursor:update
//!                                 │
//!                                 ▼
//!                   RemoteCursors::upsert()   (latest per user.id)
//!                                 │
//!                                 ▼
//!                   RemoteCursors::decorations()  ──► editing widget
//! ```
//!
//! Cursor state is ephemeral: it carries no version, is never persisted and
//! is thrown away whenever the client switches rooms.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{CursorPosition, CursorSelection, User};

/// Minimum interval between two outgoing cursor events (~20 per second).
pub const CURSOR_THROTTLE: Duration = Duration::from_millis(50);

/// Palette shared by avatars and remote carets.
const PALETTE: [&str; 6] = [
    "#6366F1", // indigo
    "#06B6D4", // cyan
    "#10B981", // emerald
    "#F59E0B", // amber
    "#8B5CF6", // violet
    "#F43F5E", // rose
];

/// Stable display colour for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserColor(&'static str);

impl UserColor {
    /// Colour derived from the user id, identical on every client.
    pub fn from_user_id(user_id: &str) -> Self {
        let hash = user_id
            .encode_utf16()
            .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as u32));
        Self(PALETTE[hash as usize % PALETTE.len()])
    }

    /// CSS hex notation, e.g. `#6366F1`.
    pub fn hex(&self) -> &'static str {
        self.0
    }
}

/// Up to two upper-case initials for an avatar.
pub fn initials(name: &str) -> String {
    name.split(' ')
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect()
}

/// Last known caret and selection of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub position: CursorPosition,
    pub selection: Option<CursorSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCursor {
    pub user: User,
    pub cursor: CursorState,
    pub color: UserColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorationKind {
    /// Zero-width range at the caret.
    Caret,
    /// Highlighted selection.
    Selection,
}

/// Something the editing widget should draw for a remote user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub user_id: String,
    pub kind: DecorationKind,
    pub range: CursorSelection,
    pub color: UserColor,
}

/// Remote cursors keyed by `user.id`; only the latest event per user is kept.
#[derive(Debug, Clone, Default)]
pub struct RemoteCursors {
    cursors: HashMap<String, RemoteCursor>,
}

impl RemoteCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user.id`.
    pub fn upsert(&mut self, user: User, cursor: CursorState) {
        let color = UserColor::from_user_id(&user.id);
        self.cursors
            .insert(user.id.clone(), RemoteCursor { user, cursor, color });
    }

    pub fn remove(&mut self, user_id: &str) -> Option<RemoteCursor> {
        self.cursors.remove(user_id)
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }

    pub fn get(&self, user_id: &str) -> Option<&RemoteCursor> {
        self.cursors.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteCursor> {
        self.cursors.values()
    }

    /// Caret and selection decorations, ordered by user id.
    ///
    /// Empty selections are not drawn; the caret covers them.
    pub fn decorations(&self) -> Vec<Decoration> {
        let mut cursors: Vec<&RemoteCursor> = self.cursors.values().collect();
        cursors.sort_by(|a, b| a.user.id.cmp(&b.user.id));

        let mut out = Vec::with_capacity(cursors.len() * 2);
        for remote in cursors {
            let pos = remote.cursor.position;
            out.push(Decoration {
                user_id: remote.user.id.clone(),
                kind: DecorationKind::Caret,
                range: CursorSelection {
                    start_line_number: pos.line_number,
                    start_column: pos.column,
                    end_line_number: pos.line_number,
                    end_column: pos.column,
                },
                color: remote.color,
            });
            if let Some(selection) = remote.cursor.selection.filter(|s| !s.is_empty()) {
                out.push(Decoration {
                    user_id: remote.user.id.clone(),
                    kind: DecorationKind::Selection,
                    range: selection,
                    color: remote.color,
                });
            }
        }
        out
    }
}

/// Client-side rate limiter for cursor emissions.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns `true` and records the emission if at least one interval
    /// has passed since the previous one.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_emit = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(CURSOR_THROTTLE)
    }
}
