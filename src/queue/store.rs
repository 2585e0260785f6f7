//! Durable FIFO of pending mutations.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{MutationKind, MutationOperation, PendingMutation, RetryVerdict};
use crate::clock::Clock;
use crate::error::StorageError;
use crate::kv::KeyValueStore;

/// Key holding the serialized queue in the key/value primitive.
pub const QUEUE_KEY: &str = "offline_queue";

/// Key where queue records that no longer decode are set aside.
pub const QUARANTINE_KEY: &str = "offline_queue.corrupt";

/// Attempts a mutation gets before it is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue of mutations made while offline.
///
/// The whole queue is one JSON array under [`QUEUE_KEY`], in append order.
/// Every read-modify-write cycle holds `write_lock`, so concurrent callers
/// inside this process never overwrite each other's changes.
///
/// Records that fail to decode (a newer build's kind, a truncated write) are
/// skipped on read and moved to [`QUARANTINE_KEY`] on the next write, so one
/// bad record never blocks the rest of the queue.
pub struct OfflineQueue {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  max_retries: u32,
  write_lock: Mutex<()>,
}

impl OfflineQueue {
  pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      max_retries: DEFAULT_MAX_RETRIES,
      write_lock: Mutex::new(()),
    }
  }

  /// Set the retry budget given to newly enqueued mutations.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn max_retries(&self) -> u32 {
    self.max_retries
  }

  /// Append a mutation. Returns its id, or `None` if it could not be saved.
  ///
  /// Never fails loudly: a storage error is logged and the caller carries on.
  pub async fn enqueue(
    &self,
    kind: MutationKind,
    operation: MutationOperation,
    payload: JsonValue,
  ) -> Option<String> {
    let mutation = PendingMutation {
      id: Uuid::new_v4().to_string(),
      kind,
      operation,
      payload,
      enqueued_at: self.clock.now(),
      retry_count: 0,
      max_retries: self.max_retries,
      last_error: None,
    };
    let id = mutation.id.clone();

    let _guard = self.write_lock.lock().await;
    let result = async {
      let mut items = self.load_for_write().await?;
      items.push(mutation);
      self.save(&items).await
    }
    .await;

    match result {
      Ok(()) => {
        debug!("Queued {} {} mutation {}", operation, kind, id);
        Some(id)
      }
      Err(e) => {
        warn!("Failed to queue {} {} mutation: {}", operation, kind, e);
        None
      }
    }
  }

  /// Snapshot of the queue, oldest first. Empty if storage cannot be read.
  pub async fn list(&self) -> Vec<PendingMutation> {
    match self.try_list().await {
      Ok(items) => items,
      Err(e) => {
        warn!("Failed to read offline queue: {}", e);
        Vec::new()
      }
    }
  }

  /// Snapshot of the queue, oldest first, surfacing storage errors.
  ///
  /// Order is append order, not `enqueued_at`; the wall clock may step back.
  pub async fn try_list(&self) -> Result<Vec<PendingMutation>, StorageError> {
    Ok(self.load().await?.items)
  }

  /// Records set aside because they could not be decoded.
  pub async fn quarantined(&self) -> Vec<JsonValue> {
    match self.store.get(QUARANTINE_KEY).await {
      Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!("Failed to read quarantined queue records: {}", e);
        Vec::new()
      }
    }
  }

  /// Number of queued mutations; 0 if storage cannot be read.
  pub async fn len(&self) -> usize {
    self.list().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  /// Delete a mutation. Returns whether it was present.
  pub async fn remove(&self, id: &str) -> bool {
    let _guard = self.write_lock.lock().await;
    let result = async {
      let mut items = self.load_for_write().await?;
      let before = items.len();
      items.retain(|m| m.id != id);
      if items.len() == before {
        return Ok(false);
      }
      self.save(&items).await?;
      Ok::<_, StorageError>(true)
    }
    .await;

    result.unwrap_or_else(|e| {
      warn!("Failed to remove queued mutation {}: {}", id, e);
      false
    })
  }

  /// Count one failed attempt against a mutation.
  ///
  /// When the count reaches the mutation's budget it is dropped and
  /// [`RetryVerdict::GiveUp`] is returned. This is the only place a queued
  /// mutation is ever evicted. If storage fails the item is left as it was
  /// and [`RetryVerdict::Unrecorded`] is returned.
  pub async fn increment_retry(&self, id: &str) -> RetryVerdict {
    self.record_failure(id, None).await
  }

  /// [`OfflineQueue::increment_retry`], keeping the failure reason on the item.
  pub async fn record_failure(&self, id: &str, reason: Option<String>) -> RetryVerdict {
    let _guard = self.write_lock.lock().await;
    let result = async {
      let mut items = self.load_for_write().await?;
      let Some(pos) = items.iter().position(|m| m.id == id) else {
        return Ok(RetryVerdict::GiveUp);
      };

      let item = &mut items[pos];
      item.retry_count += 1;
      item.last_error = reason;

      let verdict = if item.retry_count >= item.max_retries {
        let evicted = items.remove(pos);
        warn!(
          "Dropping {} {} mutation {} after {} failed attempts",
          evicted.operation, evicted.kind, evicted.id, evicted.retry_count
        );
        RetryVerdict::GiveUp
      } else {
        RetryVerdict::Retry {
          retry_count: item.retry_count,
        }
      };

      self.save(&items).await?;
      Ok::<_, StorageError>(verdict)
    }
    .await;

    result.unwrap_or_else(|e| {
      warn!("Failed to record retry for mutation {}: {}", id, e);
      RetryVerdict::Unrecorded
    })
  }

  /// Drop everything. Returns whether the queue was actually cleared.
  pub async fn clear(&self) -> bool {
    let _guard = self.write_lock.lock().await;
    match self.store.remove(QUEUE_KEY).await {
      Ok(()) => {
        debug!("Offline queue cleared");
        true
      }
      Err(e) => {
        warn!("Failed to clear offline queue: {}", e);
        false
      }
    }
  }

  async fn load(&self) -> Result<Loaded, StorageError> {
    match self.store.get(QUEUE_KEY).await? {
      Some(raw) => Ok(decode(&raw)),
      None => Ok(Loaded::default()),
    }
  }

  /// Load for a read-modify-write cycle; caller holds `write_lock`.
  ///
  /// Unreadable records are moved aside and the queue is rewritten without
  /// them before the caller sees the items.
  async fn load_for_write(&self) -> Result<Vec<PendingMutation>, StorageError> {
    let Loaded { items, rejected } = self.load().await?;
    if !rejected.is_empty() {
      self.quarantine(rejected).await?;
      self.save(&items).await?;
    }
    Ok(items)
  }

  async fn quarantine(&self, rejected: Vec<JsonValue>) -> Result<(), StorageError> {
    let mut held: Vec<JsonValue> = match self.store.get(QUARANTINE_KEY).await? {
      Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| vec![JsonValue::String(raw)]),
      None => Vec::new(),
    };
    let count = rejected.len();
    held.extend(rejected);
    self
      .store
      .set(QUARANTINE_KEY, serde_json::to_string(&held)?)
      .await?;
    warn!("Moved {} unreadable queue records to {}", count, QUARANTINE_KEY);
    Ok(())
  }

  async fn save(&self, items: &[PendingMutation]) -> Result<(), StorageError> {
    if items.is_empty() {
      return self.store.remove(QUEUE_KEY).await;
    }
    let raw = serde_json::to_string(items)?;
    self.store.set(QUEUE_KEY, raw).await
  }
}

/// Queue contents split into usable items and records that no longer decode.
#[derive(Default)]
struct Loaded {
  items: Vec<PendingMutation>,
  rejected: Vec<JsonValue>,
}

fn decode(raw: &str) -> Loaded {
  let values: Vec<JsonValue> = match serde_json::from_str(raw) {
    Ok(values) => values,
    Err(e) => {
      warn!("Offline queue does not decode, setting it aside: {}", e);
      return Loaded {
        items: Vec::new(),
        rejected: vec![JsonValue::String(raw.to_string())],
      };
    }
  };

  let mut loaded = Loaded::default();
  for value in values {
    match PendingMutation::deserialize(&value) {
      Ok(mutation) => loaded.items.push(mutation),
      Err(e) => {
        warn!("Skipping unreadable queued mutation: {}", e);
        loaded.rejected.push(value);
      }
    }
  }
  loaded
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::kv::{MemoryStore, SqliteStore};
  use chrono::Duration;
  use serde_json::json;

  fn setup() -> (OfflineQueue, Arc<MemoryStore>, Arc<ManualClock>) {
    let kv = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let queue = OfflineQueue::new(kv.clone(), clock.clone());
    (queue, kv, clock)
  }

  #[tokio::test]
  async fn test_enqueue_round_trips_fields() {
    let (queue, _, _) = setup();
    let payload = json!({ "rating": 4, "outfit_id": "o-17", "tags": ["warm"] });

    let id = queue
      .enqueue(
        MutationKind::Recommendation,
        MutationOperation::Create,
        payload.clone(),
      )
      .await
      .unwrap();

    let items = queue.list().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
    assert_eq!(items[0].kind, MutationKind::Recommendation);
    assert_eq!(items[0].operation, MutationOperation::Create);
    assert_eq!(items[0].payload, payload);
    assert_eq!(items[0].retry_count, 0);
    assert_eq!(items[0].max_retries, DEFAULT_MAX_RETRIES);
  }

  #[tokio::test]
  async fn test_list_is_fifo() {
    let (queue, _, clock) = setup();
    let mut ids = Vec::new();
    for n in 0..3 {
      ids.push(
        queue
          .enqueue(MutationKind::Preference, MutationOperation::Update, json!({ "n": n }))
          .await
          .unwrap(),
      );
      clock.advance(Duration::seconds(1));
    }

    let listed: Vec<_> = queue.list().await.into_iter().map(|m| m.id).collect();
    assert_eq!(listed, ids);
  }

  #[tokio::test]
  async fn test_retry_budget_evicts_at_max() {
    let (queue, _, _) = setup();
    let id = queue
      .enqueue(MutationKind::Schedule, MutationOperation::Delete, json!({ "event": 9 }))
      .await
      .unwrap();

    for attempt in 1..DEFAULT_MAX_RETRIES {
      assert_eq!(
        queue.increment_retry(&id).await,
        RetryVerdict::Retry {
          retry_count: attempt
        }
      );
    }

    let items = queue.list().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].retry_count, DEFAULT_MAX_RETRIES - 1);

    assert_eq!(queue.increment_retry(&id).await, RetryVerdict::GiveUp);
    assert!(queue.list().await.is_empty());
  }

  #[tokio::test]
  async fn test_record_failure_keeps_reason() {
    let (queue, _, _) = setup();
    let id = queue
      .enqueue(MutationKind::Weather, MutationOperation::Update, json!({}))
      .await
      .unwrap();

    let verdict = queue
      .record_failure(&id, Some("timeout".to_string()))
      .await;
    assert!(verdict.should_retry());
    assert_eq!(queue.list().await[0].last_error.as_deref(), Some("timeout"));
  }

  #[tokio::test]
  async fn test_increment_unknown_id_gives_up() {
    let (queue, _, _) = setup();
    assert_eq!(queue.increment_retry("missing").await, RetryVerdict::GiveUp);
  }

  #[tokio::test]
  async fn test_remove_and_clear() {
    let (queue, kv, _) = setup();
    let a = queue
      .enqueue(MutationKind::Preference, MutationOperation::Update, json!(1))
      .await
      .unwrap();
    queue
      .enqueue(MutationKind::Preference, MutationOperation::Update, json!(2))
      .await
      .unwrap();

    assert!(queue.remove(&a).await);
    assert!(!queue.remove(&a).await);
    assert_eq!(queue.len().await, 1);

    assert!(queue.clear().await);
    assert!(queue.is_empty().await);
    assert!(kv.is_empty());
  }

  #[tokio::test]
  async fn test_storage_outage_is_swallowed() {
    let (queue, kv, _) = setup();
    kv.set_unavailable(true);

    assert_eq!(
      queue
        .enqueue(MutationKind::Preference, MutationOperation::Create, json!({}))
        .await,
      None
    );
    assert!(queue.list().await.is_empty());
    assert!(queue.try_list().await.is_err());
    assert!(!queue.remove("x").await);
    assert_eq!(queue.increment_retry("x").await, RetryVerdict::Unrecorded);
    assert!(!queue.clear().await);
  }

  #[tokio::test]
  async fn test_unrecorded_failure_leaves_item_queued() {
    let (queue, kv, _) = setup();
    let id = queue
      .enqueue(MutationKind::Schedule, MutationOperation::Update, json!({}))
      .await
      .unwrap();

    kv.set_unavailable(true);
    let verdict = queue.record_failure(&id, Some("timeout".to_string())).await;
    assert_eq!(verdict, RetryVerdict::Unrecorded);
    assert!(verdict.should_retry());

    kv.set_unavailable(false);
    let items = queue.list().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].retry_count, 0);
  }

  #[tokio::test]
  async fn test_list_keeps_append_order_when_clock_steps_back() {
    let (queue, _, clock) = setup();
    let first = queue
      .enqueue(MutationKind::Preference, MutationOperation::Update, json!(1))
      .await
      .unwrap();
    clock.advance(Duration::hours(-1));
    let second = queue
      .enqueue(MutationKind::Preference, MutationOperation::Update, json!(2))
      .await
      .unwrap();

    let listed: Vec<_> = queue.list().await.into_iter().map(|m| m.id).collect();
    assert_eq!(listed, vec![first, second]);
  }

  #[tokio::test]
  async fn test_unreadable_record_is_set_aside() {
    let (queue, kv, _) = setup();
    let good = queue
      .enqueue(MutationKind::Weather, MutationOperation::Create, json!({ "n": 1 }))
      .await
      .unwrap();
    queue
      .enqueue(MutationKind::Preference, MutationOperation::Update, json!({ "n": 2 }))
      .await
      .unwrap();

    // A kind this build does not know about
    let raw = kv.get(QUEUE_KEY).await.unwrap().unwrap();
    let mut values: Vec<JsonValue> = serde_json::from_str(&raw).unwrap();
    values[1]["kind"] = json!("feedback");
    kv.set(QUEUE_KEY, serde_json::to_string(&values).unwrap())
      .await
      .unwrap();

    let listed = queue.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, good);

    for n in 0..5 {
      assert!(queue
        .enqueue(MutationKind::Schedule, MutationOperation::Create, json!({ "n": n }))
        .await
        .is_some());
    }
    assert_eq!(queue.len().await, 6);

    let quarantined = queue.quarantined().await;
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0]["kind"], json!("feedback"));
  }

  #[tokio::test]
  async fn test_truncated_queue_is_set_aside() {
    let (queue, kv, _) = setup();
    kv.set(QUEUE_KEY, "[{\"id\":\"a\",".to_string())
      .await
      .unwrap();

    assert!(queue.try_list().await.unwrap().is_empty());

    let id = queue
      .enqueue(MutationKind::Preference, MutationOperation::Delete, json!({}))
      .await
      .unwrap();
    let items = queue.list().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
    assert_eq!(
      queue.quarantined().await,
      vec![json!("[{\"id\":\"a\",")]
    );
  }

  #[tokio::test]
  async fn test_concurrent_enqueues_are_not_lost() {
    let kv = Arc::new(MemoryStore::new());
    let queue = Arc::new(OfflineQueue::new(kv, Arc::new(ManualClock::default())));

    let handles: Vec<_> = (0..20)
      .map(|n| {
        let queue = queue.clone();
        tokio::spawn(async move {
          queue
            .enqueue(MutationKind::Schedule, MutationOperation::Create, json!({ "n": n }))
            .await
        })
      })
      .collect();

    for handle in handles {
      assert!(handle.await.unwrap().is_some());
    }
    assert_eq!(queue.len().await, 20);
  }

  #[tokio::test]
  async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());

    let id = {
      let store = Arc::new(SqliteStore::open(&path).unwrap());
      let queue = OfflineQueue::new(store, clock.clone());
      let id = queue
        .enqueue(
          MutationKind::Preference,
          MutationOperation::Update,
          json!({ "style": "minimal" }),
        )
        .await
        .unwrap();
      queue.increment_retry(&id).await;
      id
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let queue = OfflineQueue::new(store, clock);
    let items = queue.list().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
    assert_eq!(items[0].retry_count, 1);
    assert_eq!(items[0].payload, json!({ "style": "minimal" }));
  }
}
