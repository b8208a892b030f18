//! Process-wide room registry.
//!
//! Maps room ids to rooms, creating a room lazily on first join. Rooms are
//! never removed while the process runs, so a document outlives all of its
//! members.
//!
//! The map itself sits behind an async `RwLock`; each room behind its own
//! `Mutex`. Creation is double-checked under the write lock so concurrent
//! joins of an unseen room always resolve to the same [`Room`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::policy::ConflictPolicy;
use crate::protocol::RoomId;
use crate::room::{Document, Room, SEED_DOCUMENT};

/// A room shared between the connections that touch it.
pub type SharedRoom = Arc<Mutex<Room>>;

/// Backing storage for the registry.
///
/// Implementations only need to behave like a map; the registry provides
/// the locking.
pub trait RoomStore: Send + Sync {
    fn get(&self, room_id: &str) -> Option<SharedRoom>;
    fn insert(&mut self, room_id: RoomId, room: SharedRoom);
    fn room_ids(&self) -> Vec<RoomId>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store; everything is lost on restart.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: HashMap<RoomId, SharedRoom>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryRoomStore {
    fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.rooms.get(room_id).cloned()
    }

    fn insert(&mut self, room_id: RoomId, room: SharedRoom) {
        self.rooms.insert(room_id, room);
    }

    fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn len(&self) -> usize {
        self.rooms.len()
    }
}

/// Room registry: maps room ids to rooms.
pub struct RoomRegistry<S: RoomStore = MemoryRoomStore> {
    store: RwLock<S>,
    seed_document: String,
    policy: ConflictPolicy,
}

impl RoomRegistry<MemoryRoomStore> {
    /// In-memory registry seeding new rooms with [`SEED_DOCUMENT`].
    pub fn new() -> Self {
        Self::with_store(MemoryRoomStore::new(), SEED_DOCUMENT, ConflictPolicy::default())
    }
}

impl Default for RoomRegistry<MemoryRoomStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RoomStore> RoomRegistry<S> {
    pub fn with_store(store: S, seed_document: impl Into<String>, policy: ConflictPolicy) -> Self {
        Self {
            store: RwLock::new(store),
            seed_document: seed_document.into(),
            policy,
        }
    }

    /// Get the room for `room_id`, creating it with the seed document and
    /// version 1 if it does not exist yet.
    pub async fn get_or_create(&self, room_id: &str) -> SharedRoom {
        // Fast path: read lock
        if let Some(room) = self.store.read().await.get(room_id) {
            return room;
        }

        let mut store = self.store.write().await;
        // Another join may have created it while we waited for the write lock
        if let Some(room) = store.get(room_id) {
            return room;
        }

        let room = Arc::new(Mutex::new(Room::new(
            room_id,
            Document::seeded(self.seed_document.clone()),
            self.policy,
        )));
        store.insert(room_id.to_string(), room.clone());
        log::info!("Created room {room_id} ({} rooms)", store.len());
        room
    }

    /// Look up an existing room without creating it.
    pub async fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.store.read().await.get(room_id)
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.get(room_id).await.is_some()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.store.read().await.room_ids()
    }

    pub async fn room_count(&self) -> usize {
        self.store.read().await.len()
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that counts inserts, to observe double creation.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryRoomStore,
        inserts: Arc<AtomicUsize>,
    }

    impl RoomStore for CountingStore {
        fn get(&self, room_id: &str) -> Option<SharedRoom> {
            self.inner.get(room_id)
        }

        fn insert(&mut self, room_id: RoomId, room: SharedRoom) {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(room_id, room);
        }

        fn room_ids(&self) -> Vec<RoomId> {
            self.inner.room_ids()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[tokio::test]
    async fn test_get_or_create_seeds_room() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("room-1").await;
        let room = room.lock().await;
        assert_eq!(room.code(), SEED_DOCUMENT);
        assert_eq!(room.version(), 1);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing() {
        let registry = RoomRegistry::new();
        let first = registry.get_or_create("room-1").await;
        first.lock().await.apply_change("x=1".into(), 1);

        let second = registry.get_or_create("room-1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.code(), "x=1");
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let registry = RoomRegistry::new();
        assert!(registry.get("missing").await.is_none());
        assert!(!registry.contains("missing").await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_yields_one_room() {
        let store = CountingStore::default();
        let inserts = store.inserts.clone();
        let registry = Arc::new(RoomRegistry::with_store(
            store,
            "seed",
            ConflictPolicy::LastWriteWins,
        ));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get_or_create("hot").await }));
        }
        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }

        assert_eq!(inserts.load(Ordering::SeqCst), 1);
        assert!(rooms.iter().all(|r| Arc::ptr_eq(r, &rooms[0])));
        assert_eq!(rooms[0].lock().await.code(), "seed");
    }

    #[tokio::test]
    async fn test_room_ids_sorted() {
        let registry = RoomRegistry::new();
        registry.get_or_create("b").await;
        registry.get_or_create("a").await;
        assert_eq!(registry.room_ids().await, vec!["a".to_string(), "b".to_string()]);
    }
}
