//! Persistent key-value storage for SliceSync.
//!
//! Every context in a realm reads and writes the same store, which plays the
//! role a browser's local storage plays for a web page: a flat map of string
//! keys to string values with synchronous access.
//!
//! # Architecture
//!
//! - [`KeyValueStore`] is the only interface the sync engine sees
//! - [`MemoryStore`] keeps entries in process memory (tests, ephemeral realms)
//! - [`SqliteStore`] persists entries in a single SQLite table
//! - [`StorageKeys`] derives the physical keys a slice owns

mod error;
mod keys;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use keys::{SECRET_KEY, StorageKeys};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A flat, synchronous string-to-string store shared by all contexts of a
/// realm.
///
/// Implementations must be safe to share behind an `Arc` and must make each
/// single-key operation atomic with respect to the others.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists every key currently present, in no particular order.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Whether `key` is present.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
