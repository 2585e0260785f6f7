//! Persistent key/value primitive underneath the cache and the offline queue.
//!
//! Both components are written strictly against [`KeyValueStore`], so the
//! backend can be swapped (in-memory for tests, SQLite on disk for real runs)
//! without touching either of them.

mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::error::StorageError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Narrow async key/value interface. Values are opaque strings.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
  /// Read a value, `None` when the key is absent.
  async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

  /// Insert or overwrite a value.
  async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

  /// Delete a key. Deleting an absent key is not an error.
  async fn remove(&self, key: &str) -> Result<(), StorageError>;

  /// Every key currently stored, in no particular order.
  async fn list_keys(&self) -> Result<Vec<String>, StorageError>;
}
