//! Interface to the external player record store.
//!
//! The server only looks records up by name and creates new ones; the schema
//! behind them belongs to the store. [`MemoryRecordStore`] keeps records in
//! process and backs the binary and the tests.

use crate::error::StoreError;
use parking_lot::Mutex;
use shared::{Equipment, Vector2};
use std::collections::HashMap;

/// Persisted part of a player's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    /// Key generated by the store, unrelated to the in-world identity.
    pub record_id: u32,
    pub name: String,
    pub position: Vector2,
    pub equipment: Equipment,
}

pub trait RecordStore: Send + Sync {
    fn lookup_player_record(&self, name: &str) -> Result<Option<PlayerRecord>, StoreError>;

    /// Creates a record for `name` and returns its generated key.
    fn create_player_record(&self, name: &str) -> Result<u32, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryRecords>,
}

#[derive(Debug, Default)]
struct MemoryRecords {
    by_name: HashMap<String, PlayerRecord>,
    next_record_id: u32,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store preloaded with `records`. Generated keys continue after the
    /// largest preloaded key.
    pub fn with_records(records: Vec<PlayerRecord>) -> Self {
        let next_record_id = records.iter().map(|r| r.record_id).max().unwrap_or(0);
        let by_name = records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        Self {
            inner: Mutex::new(MemoryRecords {
                by_name,
                next_record_id,
            }),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn lookup_player_record(&self, name: &str) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.inner.lock().by_name.get(name).cloned())
    }

    fn create_player_record(&self, name: &str) -> Result<u32, StoreError> {
        let mut records = self.inner.lock();
        if let Some(existing) = records.by_name.get(name) {
            return Err(StoreError::Query(format!(
                "player '{}' already exists with id {}",
                name, existing.record_id
            )));
        }

        records.next_record_id += 1;
        let record_id = records.next_record_id;
        records.by_name.insert(
            name.to_string(),
            PlayerRecord {
                record_id,
                name: name.to_string(),
                position: Vector2::ZERO,
                equipment: Equipment::default(),
            },
        );
        Ok(record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_missing_record() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.lookup_player_record("Alice").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_then_lookup() {
        let store = MemoryRecordStore::new();
        let id = store.create_player_record("Alice").unwrap();
        assert_eq!(id, 1);

        let record = store.lookup_player_record("Alice").unwrap().unwrap();
        assert_eq!(record.record_id, 1);
        assert_eq!(record.name, "Alice");

        assert_eq!(store.create_player_record("Bob").unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_create_fails() {
        let store = MemoryRecordStore::new();
        store.create_player_record("Alice").unwrap();
        assert!(store.create_player_record("Alice").is_err());
    }

    #[test]
    fn test_preloaded_records() {
        let store = MemoryRecordStore::with_records(vec![PlayerRecord {
            record_id: 7,
            name: "Alice".to_string(),
            position: Vector2::new(3.0, 4.0),
            equipment: Equipment::default(),
        }]);

        let record = store.lookup_player_record("Alice").unwrap().unwrap();
        assert_eq!(record.position, Vector2::new(3.0, 4.0));
        assert_eq!(store.create_player_record("Bob").unwrap(), 8);
    }
}
