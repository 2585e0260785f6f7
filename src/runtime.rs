//! Wires the offline subsystem together.

use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::cache::{CacheStore, CacheTtls};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::kv::KeyValueStore;
use crate::network::{ConnectivitySource, NetworkMonitor, NetworkState};
use crate::queue::{MutationKind, MutationOperation, OfflineQueue};
use crate::sync::{
  HandlerRegistry, ScheduleSettings, SyncCoordinator, SyncOutcome, SyncScheduler, SyncStatus,
};

pub struct OfflineRuntimeBuilder {
  store: Arc<dyn KeyValueStore>,
  connectivity: Arc<dyn ConnectivitySource>,
  clock: Arc<dyn Clock>,
  handlers: HandlerRegistry,
  config: Config,
}

impl OfflineRuntimeBuilder {
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
    self.handlers = handlers;
    self
  }

  pub fn config(mut self, config: Config) -> Self {
    self.config = config;
    self
  }

  /// Build without background work; call [`OfflineRuntime::start_scheduler`]
  /// to get automatic syncing. Must be called from within a Tokio runtime.
  pub fn build(self) -> OfflineRuntime {
    let Self {
      store,
      connectivity,
      clock,
      handlers,
      config,
    } = self;

    let cache = CacheStore::new(store.clone(), clock.clone()).with_ttls(CacheTtls {
      default: config.cache.default_ttl(),
      weather: config.cache.weather_ttl(),
      recommendation: config.cache.recommendation_ttl(),
    });
    let queue = Arc::new(
      OfflineQueue::new(store, clock.clone()).with_max_retries(config.queue.max_retries),
    );
    let network = Arc::new(NetworkMonitor::new(connectivity));
    let coordinator = Arc::new(
      SyncCoordinator::new(queue.clone(), network.clone(), handlers, clock)
        .with_pacing(config.sync.pacing()),
    );

    OfflineRuntime {
      settings: ScheduleSettings {
        pending_refresh: config.sync.pending_refresh(),
        cache_sweep: config.cache.cleanup_interval(),
      },
      cache,
      queue,
      network,
      coordinator,
      scheduler: None,
    }
  }

  /// Build and start the scheduler right away.
  pub fn start(self) -> OfflineRuntime {
    let mut runtime = self.build();
    runtime.start_scheduler();
    runtime
  }
}

/// The offline subsystem: cache, queue, network monitor and sync, sharing one
/// store and one clock.
pub struct OfflineRuntime {
  settings: ScheduleSettings,
  cache: CacheStore,
  queue: Arc<OfflineQueue>,
  network: Arc<NetworkMonitor>,
  coordinator: Arc<SyncCoordinator>,
  scheduler: Option<SyncScheduler>,
}

impl OfflineRuntime {
  pub fn builder(
    store: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn ConnectivitySource>,
  ) -> OfflineRuntimeBuilder {
    OfflineRuntimeBuilder {
      store,
      connectivity,
      clock: Arc::new(SystemClock),
      handlers: HandlerRegistry::new(),
      config: Config::default(),
    }
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  pub fn queue(&self) -> &Arc<OfflineQueue> {
    &self.queue
  }

  pub fn network(&self) -> &Arc<NetworkMonitor> {
    &self.network
  }

  pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
    &self.coordinator
  }

  pub fn network_state(&self) -> NetworkState {
    self.network.current()
  }

  pub fn sync_status(&self) -> SyncStatus {
    self.coordinator.status()
  }

  pub fn is_scheduled(&self) -> bool {
    self.scheduler.is_some()
  }

  /// Queue a mutation and refresh the pending count shown to the UI.
  pub async fn enqueue(
    &self,
    kind: MutationKind,
    operation: MutationOperation,
    payload: JsonValue,
  ) -> Option<String> {
    let id = self.queue.enqueue(kind, operation, payload).await;
    self.coordinator.refresh_pending_count().await;
    id
  }

  /// Replay the queue now instead of waiting for a trigger.
  pub async fn sync_now(&self) -> SyncOutcome {
    self.coordinator.sync_offline_queue().await
  }

  pub async fn clear_offline_queue(&self) -> bool {
    self.coordinator.clear_offline_queue().await
  }

  /// Start background syncing and sweeping. No-op if already running.
  pub fn start_scheduler(&mut self) {
    if self.scheduler.is_none() {
      self.scheduler = Some(SyncScheduler::start(
        self.coordinator.clone(),
        Some(self.cache.clone()),
        self.settings,
      ));
    }
  }

  pub async fn shutdown(mut self) {
    if let Some(scheduler) = self.scheduler.take() {
      scheduler.shutdown().await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheKey;
  use crate::clock::ManualClock;
  use crate::kv::MemoryStore;
  use crate::network::{ManualConnectivity, TransportType};
  use crate::sync::handler_fn;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn counting_handlers(calls: Arc<AtomicUsize>) -> HandlerRegistry {
    HandlerRegistry::new().register_all(Arc::new(handler_fn(move |_| {
      let calls = calls.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    })))
  }

  fn fast_config() -> Config {
    let mut config = Config::default();
    config.sync.pacing_ms = 0;
    config
  }

  #[tokio::test]
  async fn test_offline_enqueue_then_sync_when_back() {
    let kv = Arc::new(MemoryStore::new());
    let source = Arc::new(ManualConnectivity::new(NetworkState::offline()));
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = OfflineRuntime::builder(kv, source.clone())
      .handlers(counting_handlers(calls.clone()))
      .config(fast_config())
      .build();

    let id = runtime
      .enqueue(
        MutationKind::Preference,
        MutationOperation::Update,
        json!({ "style": "minimal" }),
      )
      .await;
    assert!(id.is_some());
    assert_eq!(runtime.sync_status().pending_count, 1);
    assert_eq!(runtime.sync_now().await, SyncOutcome::SkippedOffline);

    source.set(NetworkState::online(TransportType::Wifi));
    tokio::time::timeout(Duration::from_secs(2), async {
      while !runtime.network().is_online() {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .unwrap();

    assert!(matches!(
      runtime.sync_now().await,
      SyncOutcome::Completed(report) if report.succeeded == 1
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(runtime.queue().is_empty().await);
    runtime.shutdown().await;
  }

  #[tokio::test]
  async fn test_config_drives_cache_and_queue() {
    let kv = Arc::new(MemoryStore::new());
    let source = Arc::new(ManualConnectivity::new(NetworkState::offline()));
    let clock = Arc::new(ManualClock::default());
    let mut config = fast_config();
    config.cache.weather_ttl_secs = 60;
    config.queue.max_retries = 7;

    let runtime = OfflineRuntime::builder(kv, source)
      .clock(clock.clone())
      .config(config)
      .build();

    assert_eq!(runtime.queue().max_retries(), 7);
    assert_eq!(runtime.cache().ttls().weather, chrono::Duration::seconds(60));

    let key = CacheKey::weather(37.5665, 126.978);
    assert!(runtime.cache().set(key.clone(), &"sunny").await);
    clock.advance(chrono::Duration::seconds(61));
    assert_eq!(runtime.cache().get::<String>(key).await, None);
  }

  #[tokio::test]
  async fn test_scheduler_syncs_on_reconnect() {
    let kv = Arc::new(MemoryStore::new());
    let source = Arc::new(ManualConnectivity::new(NetworkState::offline()));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut runtime = OfflineRuntime::builder(kv, source.clone())
      .handlers(counting_handlers(calls.clone()))
      .config(fast_config())
      .build();

    runtime
      .enqueue(MutationKind::Schedule, MutationOperation::Create, json!({}))
      .await;
    let mut status = runtime.coordinator().watch_status();
    runtime.start_scheduler();
    runtime.start_scheduler();
    assert!(runtime.is_scheduled());

    // Let the startup refresh settle before flipping connectivity
    tokio::time::sleep(Duration::from_millis(20)).await;
    source.set_online(true);

    tokio::time::timeout(
      Duration::from_secs(2),
      status.wait_for(|s| s.last_sync_time.is_some() && s.pending_count == 0),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    runtime.shutdown().await;
  }
}
