//! TTL cache on top of the key/value primitive.

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::types::{CacheStatus, CachedEntry, EntryHeader};
use crate::clock::Clock;
use crate::kv::KeyValueStore;

/// Prefix of every key this store owns in the key/value primitive.
pub const CACHE_NAMESPACE: &str = "cache:";

/// Default lifetime of an entry written without an explicit TTL.
pub fn default_ttl() -> Duration {
  Duration::minutes(30)
}

/// Lifetimes applied by [`CacheStore::set`], picked by key kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
  pub default: Duration,
  pub weather: Duration,
  pub recommendation: Duration,
}

impl Default for CacheTtls {
  fn default() -> Self {
    Self {
      default: default_ttl(),
      weather: Duration::minutes(30),
      recommendation: Duration::hours(1),
    }
  }
}

impl CacheTtls {
  pub fn for_key(&self, key: &CacheKey) -> Duration {
    match key {
      CacheKey::Weather { .. } => self.weather,
      CacheKey::Recommendation { .. } => self.recommendation,
      CacheKey::Custom(_) => self.default,
    }
  }
}

/// Read-mostly cache with per-entry expiry.
///
/// Expired entries are never handed out: `get` deletes them on sight and
/// `cleanup_expired` sweeps whatever nobody asked for. Storage failures are
/// logged and turned into misses, so callers only ever see "value or none".
#[derive(Clone)]
pub struct CacheStore {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  ttls: CacheTtls,
}

impl CacheStore {
  pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      ttls: CacheTtls::default(),
    }
  }

  /// Set the TTL [`CacheStore::set`] uses for custom keys.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.ttls.default = ttl;
    self
  }

  /// Set every TTL [`CacheStore::set`] picks from.
  pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
    self.ttls = ttls;
    self
  }

  pub fn ttls(&self) -> CacheTtls {
    self.ttls
  }

  fn storage_key(key: &CacheKey) -> String {
    format!("{}{}", CACHE_NAMESPACE, key.render())
  }

  /// Store `value` with the TTL for its key kind. Returns whether the write landed.
  pub async fn set<T: Serialize>(&self, key: impl Into<CacheKey>, value: &T) -> bool {
    let key = key.into();
    let ttl = self.ttls.for_key(&key);
    self.set_with_ttl(key, value, ttl).await
  }

  /// Store `value`, replacing any previous entry under the same key.
  pub async fn set_with_ttl<T: Serialize>(
    &self,
    key: impl Into<CacheKey>,
    value: &T,
    ttl: Duration,
  ) -> bool {
    let storage_key = Self::storage_key(&key.into());
    let encoded = {
      let entry = CachedEntry::new(storage_key.clone(), value, self.clock.now(), ttl);
      serde_json::to_string(&entry)
    };

    let raw = match encoded {
      Ok(raw) => raw,
      Err(e) => {
        warn!("Failed to encode cache entry {}: {}", storage_key, e);
        return false;
      }
    };

    match self.store.set(&storage_key, raw).await {
      Ok(()) => {
        debug!("Cached {} for {}ms", storage_key, ttl.num_milliseconds());
        true
      }
      Err(e) => {
        warn!("Failed to write cache entry {}: {}", storage_key, e);
        false
      }
    }
  }

  /// Fetch a value that has not yet expired.
  ///
  /// An expired entry is deleted before `None` is returned, so repeated reads
  /// after expiry are cheap and idempotent.
  pub async fn get<T: DeserializeOwned>(&self, key: impl Into<CacheKey>) -> Option<T> {
    let storage_key = Self::storage_key(&key.into());

    let raw = match self.store.get(&storage_key).await {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!("Failed to read cache entry {}: {}", storage_key, e);
        return None;
      }
    };

    let header: EntryHeader = match serde_json::from_str(&raw) {
      Ok(header) => header,
      Err(e) => {
        warn!("Dropping corrupt cache entry {}: {}", storage_key, e);
        self.delete(&storage_key).await;
        return None;
      }
    };

    if !header.is_valid_at(self.clock.now()) {
      debug!("Cache entry {} expired", storage_key);
      self.delete(&storage_key).await;
      return None;
    }

    match serde_json::from_str::<CachedEntry<T>>(&raw) {
      Ok(entry) => Some(entry.data),
      Err(e) => {
        // Entry is fine, the caller asked for the wrong shape
        debug!("Cache entry {} has unexpected shape: {}", storage_key, e);
        None
      }
    }
  }

  /// Drop one entry. Returns whether the delete reached storage.
  pub async fn remove(&self, key: impl Into<CacheKey>) -> bool {
    let storage_key = Self::storage_key(&key.into());
    self.delete(&storage_key).await
  }

  /// Remove every entry in the cache namespace. Returns how many were removed.
  pub async fn clear(&self) -> usize {
    let keys = self.namespace_keys().await;
    let mut removed = 0;
    for key in keys {
      if self.delete(&key).await {
        removed += 1;
      }
    }
    debug!("Cleared {} cache entries", removed);
    removed
  }

  /// Remove every entry whose expiry is at or before now. Returns the count.
  pub async fn cleanup_expired(&self) -> usize {
    let now = self.clock.now();
    let mut removed = 0;

    for key in self.namespace_keys().await {
      let raw = match self.store.get(&key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => continue,
        Err(e) => {
          warn!("Failed to read cache entry {} during sweep: {}", key, e);
          continue;
        }
      };

      let expired = match serde_json::from_str::<EntryHeader>(&raw) {
        Ok(header) => !header.is_valid_at(now),
        Err(_) => true,
      };

      if expired && self.delete(&key).await {
        removed += 1;
      }
    }

    if removed > 0 {
      debug!("Cache sweep removed {} expired entries", removed);
    }
    removed
  }

  /// Count entries by validity. Read-only; nothing is evicted.
  pub async fn status(&self) -> CacheStatus {
    let now = self.clock.now();
    let mut status = CacheStatus::default();

    for key in self.namespace_keys().await {
      let raw = match self.store.get(&key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => continue,
        Err(e) => {
          warn!("Failed to read cache entry {} for status: {}", key, e);
          continue;
        }
      };

      status.total_entries += 1;
      status.approx_size_bytes += key.len() + raw.len();

      match serde_json::from_str::<EntryHeader>(&raw) {
        Ok(header) if header.is_valid_at(now) => status.valid_entries += 1,
        _ => status.expired_entries += 1,
      }
    }

    status
  }

  async fn namespace_keys(&self) -> Vec<String> {
    match self.store.list_keys().await {
      Ok(keys) => keys
        .into_iter()
        .filter(|k| k.starts_with(CACHE_NAMESPACE))
        .collect(),
      Err(e) => {
        warn!("Failed to list cache keys: {}", e);
        Vec::new()
      }
    }
  }

  async fn delete(&self, storage_key: &str) -> bool {
    match self.store.remove(storage_key).await {
      Ok(()) => true,
      Err(e) => {
        warn!("Failed to remove cache entry {}: {}", storage_key, e);
        false
      }
    }
  }
}
