//! RocksDB-backed presence store.
//!
//! One database holds every room. Key layout:
//! ```text
//! ┌──────────────┬────────────┬──────────┬───────────────┐
//! │ room_id len  │ room_id    │ "alien:" │ connection id │
//! │ 4 bytes BE   │ variable   │ 6 bytes  │ variable      │
//! └──────────────┴────────────┴──────────┴───────────────┘
//! value: {"country":"DE"}
//! ```
//!
//! The length prefix keeps room namespaces disjoint whatever characters a
//! room id contains, so a prefix scan of one room never reaches another.

use rocksdb::{Direction, IteratorMode, Options, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{presence_key, PresenceStore, StoreError, PRESENCE_PREFIX};
use crate::protocol::{ConnectionId, PresenceRecord};
use crate::region::RegionTag;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("orbit_data"),
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small config for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Value stored under each presence key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredPresence {
    country: RegionTag,
}

/// Shared RocksDB handle; hands out room-scoped stores.
pub struct PresenceDb {
    db: Arc<DB>,
    config: StoreConfig,
}

impl PresenceDb {
    /// Open (or create) the database at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_keep_log_file_num(5);

        let db = DB::open(&opts, &config.path)?;
        log::info!("Opened presence store at {}", config.path.display());

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// The store for one room.
    pub fn room_store(&self, room_id: &str) -> RocksPresenceStore {
        RocksPresenceStore {
            db: self.db.clone(),
            prefix: room_prefix(room_id),
            sync_writes: self.config.sync_writes,
        }
    }

    /// Rooms holding at least one persisted record, with their record count.
    pub fn persisted_rooms(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let mut rooms: Vec<(String, usize)> = Vec::new();

        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            let Some(room_id) = split_room(&key) else {
                log::warn!("Skipping unrecognised key in presence store ({} bytes)", key.len());
                continue;
            };
            // Keys are sorted, so a room's records are contiguous.
            match rooms.last_mut() {
                Some((last, count)) if last.as_str() == room_id => *count += 1,
                _ => rooms.push((room_id.to_string(), 1)),
            }
        }

        Ok(rooms)
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

/// Presence records of one room inside a [`PresenceDb`].
pub struct RocksPresenceStore {
    db: Arc<DB>,
    prefix: Vec<u8>,
    sync_writes: bool,
}

impl RocksPresenceStore {
    fn key(&self, id: &ConnectionId) -> Vec<u8> {
        let suffix = presence_key(id);
        let mut key = Vec::with_capacity(self.prefix.len() + suffix.len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(suffix.as_bytes());
        key
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }
}

impl PresenceStore for RocksPresenceStore {
    fn put(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&StoredPresence { country: record.country })?;
        self.db.put_opt(self.key(&record.id), value, &self.write_opts())?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        let mut scan = self.prefix.clone();
        scan.extend_from_slice(PRESENCE_PREFIX.as_bytes());

        let mut records = Vec::new();
        let mut corrupt = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(&scan, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            // Stop once we've left this room's presence namespace
            let Some(id) = key.strip_prefix(scan.as_slice()) else {
                break;
            };

            match decode_record(&key, id, &value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!("Dropping unreadable presence record: {e}");
                    corrupt.push(key);
                }
            }
        }

        // Best effort; a failed delete is retried on the next scan
        for key in corrupt {
            if let Err(e) = self.db.delete_opt(&key, &self.write_opts()) {
                log::warn!("Failed to delete unreadable presence record: {e}");
            }
        }

        Ok(records)
    }

    fn delete(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.db.delete_opt(self.key(id), &self.write_opts())?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "rocksdb"
    }
}

fn decode_record(key: &[u8], id: &[u8], value: &[u8]) -> Result<PresenceRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason,
    };
    let id = std::str::from_utf8(id).map_err(|e| corrupt(e.to_string()))?;
    let stored: StoredPresence =
        serde_json::from_slice(value).map_err(|e| corrupt(e.to_string()))?;
    Ok(PresenceRecord::new(ConnectionId::from(id), stored.country))
}

fn room_prefix(room_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + room_id.len());
    prefix.extend_from_slice(&(room_id.len() as u32).to_be_bytes());
    prefix.extend_from_slice(room_id.as_bytes());
    prefix
}

/// Recover the room id from a full key.
fn split_room(key: &[u8]) -> Option<&str> {
    let (len, rest) = key.split_first_chunk::<4>()?;
    let len = u32::from_be_bytes(*len) as usize;
    let room = rest.get(..len)?;
    std::str::from_utf8(room).ok()
}
