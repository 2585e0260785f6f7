//! Connectivity monitor with push-based subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::ConnectivitySource;
use super::NetworkState;

type Callback = Box<dyn Fn(&NetworkState) + Send + Sync>;

struct Listener {
  id: u64,
  callback: Callback,
  /// Sequence number of the last state handed to `callback`
  delivered: Mutex<u64>,
}

impl Listener {
  /// Hand `state` over unless a newer one already reached this listener.
  fn deliver(&self, seq: u64, state: &NetworkState) {
    let mut delivered = self.delivered.lock().unwrap_or_else(|e| e.into_inner());
    if seq > *delivered {
      *delivered = seq;
      (self.callback)(state);
    }
  }
}

#[derive(Default)]
struct Listeners {
  next_id: u64,
  entries: Vec<Arc<Listener>>,
}

struct Shared {
  state: watch::Sender<NetworkState>,
  /// Bumped under the watch write lock on every change; the initial state is 1
  seq: AtomicU64,
  listeners: Arc<Mutex<Listeners>>,
}

impl Shared {
  /// Record a new state and notify listeners if it differs from the last one.
  fn publish(&self, next: NetworkState) {
    let mut previous = None;
    let mut seq = 0;
    let changed = self.state.send_if_modified(|current| {
      if *current == next {
        return false;
      }
      previous = Some(std::mem::replace(current, next.clone()));
      seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
      true
    });
    if !changed {
      return;
    }

    if let Some(previous) = previous {
      if previous.is_online() != next.is_online() {
        info!("Network went {} -> {}", previous, next);
      } else {
        debug!("Network changed {:?} -> {:?}", previous, next);
      }
    }

    // Call listeners outside the lock so they may (un)subscribe
    let listeners: Vec<Arc<Listener>> = match self.listeners.lock() {
      Ok(guard) => guard.entries.clone(),
      Err(e) => {
        warn!("Network listener list poisoned: {}", e);
        return;
      }
    };
    for listener in listeners {
      listener.deliver(seq, &next);
    }
  }
}

/// Keeps the latest connectivity state and fans out transitions.
///
/// The state is only ever written from the platform side; everything else
/// reads it through [`NetworkMonitor::current`], [`NetworkMonitor::watch`] or a
/// subscription.
pub struct NetworkMonitor {
  source: Arc<dyn ConnectivitySource>,
  shared: Arc<Shared>,
  forwarder: JoinHandle<()>,
}

impl NetworkMonitor {
  /// Start following `source`. Must be called from within a Tokio runtime.
  pub fn new(source: Arc<dyn ConnectivitySource>) -> Self {
    let mut changes = source.changes();
    let initial = changes.borrow_and_update().clone();
    let (state, _rx) = watch::channel(initial);

    let shared = Arc::new(Shared {
      state,
      seq: AtomicU64::new(1),
      listeners: Arc::new(Mutex::new(Listeners::default())),
    });

    let forwarder = {
      let shared = Arc::clone(&shared);
      tokio::spawn(async move {
        while changes.changed().await.is_ok() {
          let next = changes.borrow_and_update().clone();
          shared.publish(next);
        }
        debug!("Connectivity source closed");
      })
    };

    Self {
      source,
      shared,
      forwarder,
    }
  }

  /// Last known state, without asking the platform.
  pub fn current(&self) -> NetworkState {
    self.shared.state.borrow().clone()
  }

  pub fn is_online(&self) -> bool {
    self.shared.state.borrow().is_online()
  }

  /// Ask the platform for a fresh reading and publish it.
  ///
  /// If the platform cannot answer, the last known state is returned.
  pub async fn get_current_state(&self) -> NetworkState {
    match self.source.fetch().await {
      Ok(state) => {
        self.shared.publish(state.clone());
        state
      }
      Err(e) => {
        warn!("Failed to refresh network state: {}", e);
        self.current()
      }
    }
  }

  /// Call `callback` with the current state now and on every change after.
  ///
  /// The callback stays registered until the returned [`Subscription`] is
  /// dropped or unsubscribed. A transition racing with the initial call never
  /// leaves the callback holding the older state.
  #[must_use = "dropping the subscription unsubscribes immediately"]
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&NetworkState) + Send + Sync + 'static,
  {
    let listener = {
      let mut guard = self
        .shared
        .listeners
        .lock()
        .unwrap_or_else(|e| e.into_inner());
      let listener = Arc::new(Listener {
        id: guard.next_id,
        callback: Box::new(callback),
        delivered: Mutex::new(0),
      });
      guard.next_id += 1;
      guard.entries.push(Arc::clone(&listener));
      listener
    };

    // Registered first, so any later change is delivered by `publish`
    let (seq, state) = {
      let current = self.shared.state.borrow();
      (self.shared.seq.load(Ordering::SeqCst), current.clone())
    };
    listener.deliver(seq, &state);

    Subscription {
      id: listener.id,
      listeners: Arc::downgrade(&self.shared.listeners),
    }
  }

  /// Receiver for async consumers that want to `await` transitions.
  pub fn watch(&self) -> watch::Receiver<NetworkState> {
    self.shared.state.subscribe()
  }

  /// Number of live subscriptions.
  pub fn subscriber_count(&self) -> usize {
    self
      .shared
      .listeners
      .lock()
      .map(|g| g.entries.len())
      .unwrap_or(0)
  }
}

impl Drop for NetworkMonitor {
  fn drop(&mut self) {
    self.forwarder.abort();
  }
}

/// Handle for a registered callback. Dropping it unsubscribes.
pub struct Subscription {
  id: u64,
  listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(listeners) = self.listeners.upgrade() {
      let mut guard = listeners.lock().unwrap_or_else(|e| e.into_inner());
      guard.entries.retain(|l| l.id != self.id);
    }
  }
}
