//! In-process store, lost on exit.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::KeyValueStore;
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
  unavailable: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent call fail with [`StorageError::Unavailable`]
  /// until switched back. Simulates a storage outage.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  /// Number of stored keys, ignoring the outage switch.
  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(StorageError::Unavailable);
    }
    self
      .entries
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
  }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.entries()?.get(key).cloned())
  }

  async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
    self.entries()?.insert(key.to_string(), value);
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), StorageError> {
    self.entries()?.remove(key);
    Ok(())
  }

  async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
    Ok(self.entries()?.keys().cloned().collect())
  }
}
