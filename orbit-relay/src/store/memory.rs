//! In-memory presence store for ephemeral deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{presence_key, PresenceStore, StoreError, PRESENCE_PREFIX};
use crate::protocol::{ConnectionId, PresenceRecord};
use crate::region::RegionTag;

/// Presence records held in a process-local map.
///
/// Keyed the same way as the durable store so both behave identically
/// under prefix listing.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    records: Mutex<HashMap<String, RegionTag>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PresenceStore for MemoryPresenceStore {
    fn put(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(presence_key(&record.id), record.country);
        Ok(())
    }

    fn list(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .iter()
            .filter_map(|(key, country)| {
                key.strip_prefix(PRESENCE_PREFIX)
                    .map(|id| PresenceRecord::new(ConnectionId::from(id), *country))
            })
            .collect())
    }

    fn delete(&self, id: &ConnectionId) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.remove(&presence_key(id));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
