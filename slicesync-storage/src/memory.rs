//! In-process store.

use crate::error::{StorageError, StorageResult};
use crate::KeyValueStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// A store that lives only as long as the process.
///
/// Sharing one `Arc<MemoryStore>` between several mounts is how tests model
/// several contexts over the same persistent storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}
