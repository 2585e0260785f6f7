//! Replays the offline queue once connectivity is back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::handlers::HandlerRegistry;
use crate::clock::Clock;
use crate::network::NetworkMonitor;
use crate::queue::{OfflineQueue, RetryVerdict};

/// Pause between two replayed mutations.
pub const DEFAULT_PACING: Duration = Duration::from_millis(100);

/// What an indicator UI needs to render sync progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
  pub in_progress: bool,
  /// Items handled so far in the current (or last) run
  pub processed: usize,
  /// Size of the snapshot the current (or last) run works through
  pub total: usize,
  pub last_sync_time: Option<DateTime<Utc>>,
  pub pending_count: usize,
}

/// Tally of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub succeeded: usize,
  /// Failed, still queued for a later run
  pub retried: usize,
  /// Failed for the last time, no longer queued
  pub dropped: usize,
}

impl SyncReport {
  pub fn attempted(&self) -> usize {
    self.succeeded + self.retried + self.dropped
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Offline; nothing was touched
  SkippedOffline,
  /// Another run holds the lock; nothing was touched
  SkippedBusy,
  /// The queue could not be read; nothing was touched
  Aborted,
  Completed(SyncReport),
}

/// Clears `in_progress` however a run ends, including when its future is
/// dropped mid-item (task abort, `timeout`, `select!`).
struct IdleOnDrop<'a> {
  status: &'a watch::Sender<SyncStatus>,
}

impl Drop for IdleOnDrop<'_> {
  fn drop(&mut self) {
    self
      .status
      .send_if_modified(|s| std::mem::replace(&mut s.in_progress, false));
  }
}

/// Drives replay of the offline queue.
///
/// States are `Idle` and `Syncing`. A run takes one snapshot of the queue,
/// replays it strictly in order with a fixed pause between items, and always
/// ends back in `Idle`. Items queued during a run wait for the next one.
/// At most one run is active per coordinator; this is an in-process lock,
/// not a cross-process one.
pub struct SyncCoordinator {
  queue: Arc<OfflineQueue>,
  network: Arc<NetworkMonitor>,
  handlers: HandlerRegistry,
  clock: Arc<dyn Clock>,
  pacing: Duration,
  run_lock: Mutex<()>,
  status: watch::Sender<SyncStatus>,
}

impl SyncCoordinator {
  pub fn new(
    queue: Arc<OfflineQueue>,
    network: Arc<NetworkMonitor>,
    handlers: HandlerRegistry,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let (status, _rx) = watch::channel(SyncStatus::default());
    Self {
      queue,
      network,
      handlers,
      clock,
      pacing: DEFAULT_PACING,
      run_lock: Mutex::new(()),
      status,
    }
  }

  /// Set the pause between replayed items.
  pub fn with_pacing(mut self, pacing: Duration) -> Self {
    self.pacing = pacing;
    self
  }

  pub fn network(&self) -> &Arc<NetworkMonitor> {
    &self.network
  }

  pub fn queue(&self) -> &Arc<OfflineQueue> {
    &self.queue
  }

  /// Replay the queue once, if online and not already running.
  ///
  /// Never fails: per-item failures go through the retry policy and
  /// coordinator-level failures abort the run and are logged.
  pub async fn sync_offline_queue(&self) -> SyncOutcome {
    if self.network.current().is_offline() {
      debug!("Skipping sync: offline");
      return SyncOutcome::SkippedOffline;
    }

    let Ok(_run) = self.run_lock.try_lock() else {
      debug!("Skipping sync: a run is already in progress");
      return SyncOutcome::SkippedBusy;
    };
    let _idle = IdleOnDrop {
      status: &self.status,
    };

    self.status.send_modify(|s| {
      s.in_progress = true;
      s.processed = 0;
      s.total = 0;
    });

    let snapshot = match self.queue.try_list().await {
      Ok(items) => items,
      Err(e) => {
        error!("Sync aborted, could not read offline queue: {}", e);
        self.status.send_modify(|s| s.in_progress = false);
        return SyncOutcome::Aborted;
      }
    };

    let total = snapshot.len();
    self.status.send_modify(|s| s.total = total);
    if total > 0 {
      info!("Syncing {} queued mutations", total);
    }

    let mut report = SyncReport::default();
    for (index, mutation) in snapshot.iter().enumerate() {
      if index > 0 && !self.pacing.is_zero() {
        tokio::time::sleep(self.pacing).await;
      }

      match self.handlers.dispatch(mutation).await {
        Ok(()) => {
          if !self.queue.remove(&mutation.id).await {
            warn!(
              "Mutation {} applied but could not be removed from the queue",
              mutation.id
            );
          }
          debug!("Replayed {} {} mutation {}", mutation.operation, mutation.kind, mutation.id);
          report.succeeded += 1;
        }
        Err(e) => {
          let transient = e.is_transient();
          match self.queue.record_failure(&mutation.id, Some(e.to_string())).await {
            RetryVerdict::Retry { retry_count } => {
              warn!(
                "Replay of {} mutation {} failed (attempt {}/{}, transient: {}): {}",
                mutation.kind, mutation.id, retry_count, mutation.max_retries, transient, e
              );
              report.retried += 1;
            }
            RetryVerdict::Unrecorded => {
              warn!(
                "Replay of {} mutation {} failed and the failure could not be recorded, it stays queued: {}",
                mutation.kind, mutation.id, e
              );
              report.retried += 1;
            }
            RetryVerdict::GiveUp => {
              warn!(
                "Replay of {} mutation {} failed for the last time: {}",
                mutation.kind, mutation.id, e
              );
              report.dropped += 1;
            }
          }
        }
      }

      self.status.send_modify(|s| s.processed = index + 1);
    }

    let pending = self.queue.len().await;
    let now = self.clock.now();
    self.status.send_modify(|s| {
      s.in_progress = false;
      s.last_sync_time = Some(now);
      s.pending_count = pending;
    });

    if total > 0 {
      info!(
        "Sync finished: {} applied, {} to retry, {} dropped, {} pending",
        report.succeeded, report.retried, report.dropped, pending
      );
    } else {
      debug!("Sync finished: queue was empty");
    }

    SyncOutcome::Completed(report)
  }

  /// Drop every queued mutation. Returns whether the queue was cleared.
  pub async fn clear_offline_queue(&self) -> bool {
    let cleared = self.queue.clear().await;
    self.refresh_pending_count().await;
    cleared
  }

  /// Re-read the queue length into the status. Returns it.
  pub async fn refresh_pending_count(&self) -> usize {
    let pending = self.queue.len().await;
    self.status.send_modify(|s| s.pending_count = pending);
    pending
  }

  pub fn status(&self) -> SyncStatus {
    self.status.borrow().clone()
  }

  /// Receiver that changes whenever the status does.
  pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
    self.status.subscribe()
  }

  pub fn pending_count(&self) -> usize {
    self.status.borrow().pending_count
  }

  pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
    self.status.borrow().last_sync_time
  }

  pub fn is_syncing(&self) -> bool {
    self.status.borrow().in_progress
  }
}
