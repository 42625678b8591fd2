//! Room state stores: the authoritative presence set of one room.
//!
//! ```text
//! ┌──────────┐  put / list / delete   ┌──────────────────────┐
//! │   Room   │ ─────────────────────► │ dyn PresenceStore    │
//! └──────────┘                        ├──────────────────────┤
//!                                     │ MemoryPresenceStore  │  ephemeral
//!                                     │ RocksPresenceStore   │  survives restarts
//!                                     └──────────┬───────────┘
//!                                                │ room-prefixed keys
//!                                                ▼
//!                                     ┌──────────────────────┐
//!                                     │ PresenceDb (RocksDB) │
//!                                     └──────────────────────┘
//! ```
//!
//! Every store is scoped to exactly one room; rooms never see each other's
//! records. Records are replaced wholesale, never patched.

pub mod memory;
pub mod rocks;

pub use memory::MemoryPresenceStore;
pub use rocks::{PresenceDb, RocksPresenceStore, StoreConfig};

use crate::protocol::{ConnectionId, PresenceRecord};

/// Key namespace of presence records inside a room.
pub const PRESENCE_PREFIX: &str = "alien:";

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// RocksDB internal error
    #[error("database error: {0}")]
    Database(String),
    /// Record could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Stored bytes do not decode to a presence record
    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
    /// A thread panicked while holding the store lock
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Presence records of a single room.
///
/// Calls may block briefly on I/O; they are made from async tasks the same
/// way the rest of the relay touches RocksDB.
pub trait PresenceStore: Send + Sync {
    /// Insert or overwrite the record for `record.id`.
    fn put(&self, record: &PresenceRecord) -> Result<(), StoreError>;

    /// All records under [`PRESENCE_PREFIX`]. Order is unspecified.
    fn list(&self) -> Result<Vec<PresenceRecord>, StoreError>;

    /// Remove a record. Removing an absent record is not an error.
    fn delete(&self, id: &ConnectionId) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Build the namespaced key for a connection.
pub(crate) fn presence_key(id: &ConnectionId) -> String {
    format!("{PRESENCE_PREFIX}{id}")
}
