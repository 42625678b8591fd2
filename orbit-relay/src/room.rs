//! Room lifecycle: join, relay and leave for the connections of one room.
//!
//! ```text
//!  join ──► resolve_region ──► store.put ──► store.list (reconciled)
//!                                               │
//!                         init (joiner only) ◄──┤
//!                  new_alien (everyone else) ◄──┘
//!
//!  waypoint ──► parse ──► relay to everyone else      (store untouched)
//!
//!  leave ──► unregister ──► store.delete ──► remove (everyone else)
//! ```
//!
//! Joins and leaves of a room are serialised by a per-room mutex so a
//! snapshot is never built while another join or leave is half done.
//! Relays skip that mutex; they only need the broadcast group.

use std::collections::{HashMap, HashSet};
use std::slice;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::broadcast::{BroadcastGroup, BroadcastStats, DEFAULT_QUEUE_CAPACITY};
use crate::error::RelayError;
use crate::protocol::{
    ClientMessage, ConnectionId, Frame, PresenceRecord, RoomVocabulary, ServerMessage,
};
use crate::region::resolve_region;
use crate::store::{MemoryPresenceStore, PresenceDb, PresenceStore, StoreError};

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Relayed to this many connections.
    Relayed(usize),
    /// Valid JSON with a type this room does not relay.
    Ignored,
    /// Not parseable; dropped.
    Malformed,
}

/// One isolated shared space.
pub struct Room {
    id: String,
    vocabulary: RoomVocabulary,
    store: Arc<dyn PresenceStore>,
    group: BroadcastGroup,
    /// Serialises join/leave against each other
    lifecycle: Mutex<()>,
}

impl Room {
    pub fn new(
        id: impl Into<String>,
        vocabulary: RoomVocabulary,
        store: Arc<dyn PresenceStore>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            id: id.into(),
            vocabulary,
            store,
            group: BroadcastGroup::new(queue_capacity),
            lifecycle: Mutex::new(()),
        }
    }

    /// Room backed by a fresh in-memory store.
    pub fn in_memory(id: impl Into<String>, vocabulary: RoomVocabulary) -> Self {
        Self::new(id, vocabulary, Arc::new(MemoryPresenceStore::new()), DEFAULT_QUEUE_CAPACITY)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vocabulary(&self) -> RoomVocabulary {
        self.vocabulary
    }

    pub fn store(&self) -> &Arc<dyn PresenceStore> {
        &self.store
    }

    /// Admit a connection and return the queue of frames addressed to it.
    ///
    /// The joiner's first frame is the `init` snapshot of everyone else;
    /// only then are the others told about the joiner. If the store fails,
    /// the connection is still registered for relays but nobody, the joiner
    /// included, hears about the join.
    pub async fn join(&self, id: ConnectionId, region_hint: Option<&str>) -> mpsc::Receiver<Frame> {
        let _lifecycle = self.lifecycle.lock().await;
        let record = PresenceRecord::new(id.clone(), resolve_region(region_hint));
        if let (Some(hint), false) = (region_hint, record.country.is_known()) {
            log::debug!("Room {}: unusable region hint {hint:?} from {id}", self.id);
        }

        let (init, joined) = match self.admit(&record).await {
            Ok((init, joined)) => (Some(init), Some(joined)),
            Err(e) => {
                log::error!("Room {}: join of {id} not announced: {e}", self.id);
                (None, None)
            }
        };

        let rx = self.group.add_peer(id.clone(), init).await;
        if let Some(frame) = joined {
            let notified = self.group.broadcast(frame, slice::from_ref(&id)).await;
            log::debug!("Room {}: join of {id} sent to {notified} connections", self.id);
        }

        log::info!("Connection {id} joined room {} from {}", self.id, record.country);
        rx
    }

    /// Persist the record and build the `init` and join-notice frames.
    async fn admit(&self, record: &PresenceRecord) -> Result<(Frame, Frame), RelayError> {
        self.store.put(record)?;
        let participants = self.reconciled(Some(&record.id)).await?;
        let init = ServerMessage::Init { participants }.encode(&self.vocabulary)?;
        let joined = ServerMessage::Joined(record.clone()).encode(&self.vocabulary)?;
        Ok((init, joined))
    }

    /// Stored records of connections registered here, minus `joiner`.
    ///
    /// Records without a registered connection are ghosts left by a crash
    /// or a failed delete; they are dropped from the result and deleted.
    async fn reconciled(&self, joiner: Option<&ConnectionId>) -> Result<Vec<PresenceRecord>, StoreError> {
        let live: HashSet<ConnectionId> = self.group.peer_ids().await.into_iter().collect();
        let mut present = Vec::new();

        for record in self.store.list()? {
            if Some(&record.id) == joiner {
                continue;
            }
            if live.contains(&record.id) {
                present.push(record);
                continue;
            }
            log::debug!("Room {}: pruning stale presence {}", self.id, record.id);
            if let Err(e) = self.store.delete(&record.id) {
                log::warn!("Room {}: failed to prune {}: {e}", self.id, record.id);
            }
        }

        Ok(present)
    }

    /// Handle one inbound payload. Never fails the connection.
    pub async fn on_message(&self, from: &ConnectionId, raw: &str) -> MessageOutcome {
        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Room {}: dropping message from {from}: {e}", self.id);
                return MessageOutcome::Malformed;
            }
        };

        let position = match message.movement() {
            Some((event, position)) if event == self.vocabulary.move_event => position.clone(),
            _ => {
                log::trace!("Room {}: ignoring {message:?} from {from}", self.id);
                return MessageOutcome::Ignored;
            }
        };

        let relay = ServerMessage::Moved { id: from.clone(), position };
        match relay.encode(&self.vocabulary) {
            Ok(frame) => {
                let delivered = self.group.broadcast(frame, slice::from_ref(from)).await;
                log::trace!("Room {}: relayed move from {from} to {delivered}", self.id);
                MessageOutcome::Relayed(delivered)
            }
            Err(e) => {
                log::error!("Room {}: failed to encode relay: {e}", self.id);
                MessageOutcome::Ignored
            }
        }
    }

    /// Remove a connection. Returns `false` if it had already left.
    pub async fn leave(&self, id: &ConnectionId) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.group.remove_peer(id).await {
            return false;
        }

        if let Err(e) = self.store.delete(id) {
            log::error!("Room {}: failed to delete presence of {id}: {e}", self.id);
        }

        // The connection is gone whatever the store said; tell the others.
        match (ServerMessage::Removed { id: id.clone() }).encode(&self.vocabulary) {
            Ok(frame) => {
                self.group.broadcast(frame, slice::from_ref(id)).await;
            }
            Err(e) => log::error!("Room {}: failed to encode removal: {e}", self.id),
        }

        log::info!("Connection {id} left room {}", self.id);
        true
    }

    /// Current reconciled presence set.
    pub async fn presence(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.reconciled(None).await
    }

    pub async fn peer_count(&self) -> usize {
        self.group.peer_count().await
    }

    pub async fn stats(&self) -> BroadcastStats {
        self.group.stats().await
    }
}

/// Where rooms keep their presence records.
#[derive(Clone)]
pub enum StoreBackend {
    /// Fresh map per room instance; lost on eviction or restart.
    Memory,
    /// Shared RocksDB; records outlive room instances and restarts.
    Rocks(Arc<PresenceDb>),
}

impl StoreBackend {
    fn open(&self, room_id: &str) -> Arc<dyn PresenceStore> {
        match self {
            StoreBackend::Memory => Arc::new(MemoryPresenceStore::new()),
            StoreBackend::Rocks(db) => Arc::new(db.room_store(room_id)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Rocks(_) => "rocksdb",
        }
    }
}

/// Maps room ids to live room instances, created on first use.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    backend: StoreBackend,
    fish_rooms: Vec<String>,
    queue_capacity: usize,
}

impl RoomManager {
    pub fn new(backend: StoreBackend, fish_rooms: Vec<String>, queue_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            backend,
            fish_rooms,
            queue_capacity,
        }
    }

    /// Get or create the room for `room_id`.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let vocabulary = RoomVocabulary::for_room(room_id, &self.fish_rooms);
        let room = Arc::new(Room::new(
            room_id,
            vocabulary,
            self.backend.open(room_id),
            self.queue_capacity,
        ));
        rooms.insert(room_id.to_string(), room.clone());
        log::info!(
            "Room {room_id} created ({} store, {} vocabulary)",
            room.store().backend(),
            vocabulary.snapshot_key
        );
        room
    }

    /// Drop the in-memory room if nobody is connected or about to connect.
    ///
    /// Durable records stay in the store.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id) else {
            return false;
        };
        // Any other holder is a connection task that has not left yet
        if Arc::strong_count(room) > 1 || room.peer_count().await > 0 {
            return false;
        }
        let stats = room.stats().await;
        rooms.remove(room_id);
        log::info!(
            "Room {room_id} removed (empty, {} frames sent, {} dropped)",
            stats.messages_sent,
            stats.messages_dropped
        );
        true
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub fn backend(&self) -> &StoreBackend {
        &self.backend
    }
}
