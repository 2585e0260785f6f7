//! Background task that decides when to sync and sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::coordinator::SyncCoordinator;
use crate::cache::CacheStore;

/// How often pending work is re-counted by default.
pub const DEFAULT_PENDING_REFRESH: Duration = Duration::from_secs(5 * 60);

/// Timer settings for [`SyncScheduler`].
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
  /// Re-count the queue, and sync if anything is pending
  pub pending_refresh: Duration,
  /// Sweep expired cache entries; `None` disables sweeping
  pub cache_sweep: Option<Duration>,
}

impl Default for ScheduleSettings {
  fn default() -> Self {
    Self {
      pending_refresh: DEFAULT_PENDING_REFRESH,
      cache_sweep: Some(Duration::from_secs(15 * 60)),
    }
  }
}

/// Owns the sync and sweep timers for the lifetime of the subsystem.
///
/// Triggers:
/// - offline -> online transition: always run a sync
/// - pending refresh tick: re-count the queue, sync if online and non-empty
/// - cache sweep tick: drop expired cache entries
///
/// A sync started by the scheduler runs to completion before the next
/// trigger is looked at, so shutdown waits for an in-flight run.
pub struct SyncScheduler {
  shutdown: Option<oneshot::Sender<()>>,
  task: Option<JoinHandle<()>>,
}

impl SyncScheduler {
  /// Spawn the scheduler task. Must be called from within a Tokio runtime.
  pub fn start(
    coordinator: Arc<SyncCoordinator>,
    cache: Option<CacheStore>,
    settings: ScheduleSettings,
  ) -> Self {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(coordinator, cache, settings, shutdown_rx));

    Self {
      shutdown: Some(shutdown_tx),
      task: Some(task),
    }
  }

  /// Stop the scheduler and wait for it to exit.
  pub async fn shutdown(mut self) {
    if let Some(tx) = self.shutdown.take() {
      let _ = tx.send(());
    }
    if let Some(task) = self.task.take() {
      if let Err(e) = task.await {
        if !e.is_cancelled() {
          warn!("Sync scheduler ended abnormally: {}", e);
        }
      }
    }
  }
}

impl Drop for SyncScheduler {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

async fn run(
  coordinator: Arc<SyncCoordinator>,
  cache: Option<CacheStore>,
  settings: ScheduleSettings,
  mut shutdown: oneshot::Receiver<()>,
) {
  let mut network = coordinator.network().watch();
  let mut was_online = network.borrow_and_update().is_online();
  let mut network_open = true;

  // First tick fires immediately, which doubles as the startup catch-up
  let mut refresh = tokio::time::interval(settings.pending_refresh);
  refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

  let mut sweep: Option<Interval> = cache.as_ref().and(settings.cache_sweep).map(|period| {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
  });

  info!(
    "Sync scheduler started (pending refresh every {}s)",
    settings.pending_refresh.as_secs()
  );

  loop {
    tokio::select! {
      _ = &mut shutdown => break,

      changed = network.changed(), if network_open => {
        if changed.is_err() {
          debug!("Network monitor gone, scheduler falls back to timers");
          network_open = false;
          continue;
        }
        let online = network.borrow_and_update().is_online();
        if online && !was_online {
          debug!("Back online, syncing offline queue");
          coordinator.sync_offline_queue().await;
        }
        was_online = online;
      }

      _ = refresh.tick() => {
        let pending = coordinator.refresh_pending_count().await;
        if pending > 0 && coordinator.network().is_online() {
          coordinator.sync_offline_queue().await;
        }
      }

      _ = tick(&mut sweep) => {
        if let Some(cache) = &cache {
          cache.cleanup_expired().await;
        }
      }
    }
  }

  info!("Sync scheduler stopped");
}

/// Tick an optional interval; never resolves when there is none.
async fn tick(interval: &mut Option<Interval>) {
  match interval {
    Some(interval) => {
      interval.tick().await;
    }
    None => std::future::pending::<()>().await,
  }
}
