//! Core types for the TTL cache.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A value as it sits in the key/value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry<T> {
  /// Full storage key, including the namespace prefix
  pub key: String,
  pub data: T,
  pub created_at: DateTime<Utc>,
  /// Lifetime in milliseconds, measured from `created_at`
  pub ttl_ms: i64,
}

impl<T> CachedEntry<T> {
  pub fn new(key: String, data: T, created_at: DateTime<Utc>, ttl: Duration) -> Self {
    Self {
      key,
      data,
      created_at,
      ttl_ms: ttl.num_milliseconds(),
    }
  }

  pub fn expires_at(&self) -> DateTime<Utc> {
    expiry(self.created_at, self.ttl_ms)
  }

  /// Valid iff `now < expires_at`.
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    now < self.expires_at()
  }
}

/// Entry header used when the payload type is irrelevant (sweeps, status).
#[derive(Debug, Deserialize)]
pub(crate) struct EntryHeader {
  pub created_at: DateTime<Utc>,
  pub ttl_ms: i64,
}

impl EntryHeader {
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    now < expiry(self.created_at, self.ttl_ms)
  }
}

fn expiry(created_at: DateTime<Utc>, ttl_ms: i64) -> DateTime<Utc> {
  created_at
    .checked_add_signed(Duration::milliseconds(ttl_ms))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Snapshot of the cache namespace for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
  pub total_entries: usize,
  pub valid_entries: usize,
  /// Entries past expiry, plus entries that no longer decode
  pub expired_entries: usize,
  /// Sum of key and value lengths in bytes
  pub approx_size_bytes: usize,
}
