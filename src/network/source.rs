//! Platform connectivity sources.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{NetworkState, TransportType};
use crate::error::NetworkError;

/// Where connectivity information comes from.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
  /// Read the state right now.
  async fn fetch(&self) -> Result<NetworkState, NetworkError>;

  /// Receiver that changes on every platform transition.
  fn changes(&self) -> watch::Receiver<NetworkState>;
}

/// Source whose state is set by hand.
///
/// Used by tests, by embedders that already get connectivity callbacks from
/// their platform, and by the CLI when forced offline.
#[derive(Debug)]
pub struct ManualConnectivity {
  tx: watch::Sender<NetworkState>,
}

impl ManualConnectivity {
  pub fn new(initial: NetworkState) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx }
  }

  /// Report a new state. Listeners only hear about actual changes.
  pub fn set(&self, state: NetworkState) {
    self.tx.send_if_modified(|current| {
      if *current == state {
        return false;
      }
      *current = state;
      true
    });
  }

  pub fn set_online(&self, online: bool) {
    if online {
      self.set(NetworkState::online(TransportType::Other));
    } else {
      self.set(NetworkState::offline());
    }
  }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
  async fn fetch(&self) -> Result<NetworkState, NetworkError> {
    Ok(self.tx.borrow().clone())
  }

  fn changes(&self) -> watch::Receiver<NetworkState> {
    self.tx.subscribe()
  }
}

/// Source that decides reachability by opening a TCP connection.
///
/// A background task probes `addr` every `interval`; `fetch` probes on demand.
pub struct ProbeConnectivity {
  addr: String,
  timeout: Duration,
  tx: Arc<watch::Sender<NetworkState>>,
  task: JoinHandle<()>,
}

impl ProbeConnectivity {
  /// Start probing. Must be called from within a Tokio runtime.
  pub fn spawn(addr: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
    let addr = addr.into();
    let (tx, _rx) = watch::channel(NetworkState::unknown());
    let tx = Arc::new(tx);

    let task = {
      let addr = addr.clone();
      let tx = Arc::clone(&tx);
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
          ticker.tick().await;
          let state = probe(&addr, timeout).await;
          publish(&tx, state);
        }
      })
    };

    Self {
      addr,
      timeout,
      tx,
      task,
    }
  }
}

impl Drop for ProbeConnectivity {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[async_trait]
impl ConnectivitySource for ProbeConnectivity {
  async fn fetch(&self) -> Result<NetworkState, NetworkError> {
    let state = probe(&self.addr, self.timeout).await;
    publish(&self.tx, state.clone());
    Ok(state)
  }

  fn changes(&self) -> watch::Receiver<NetworkState> {
    self.tx.subscribe()
  }
}

async fn probe(addr: &str, timeout: Duration) -> NetworkState {
  match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
    Ok(Ok(_)) => NetworkState::online(TransportType::Other),
    Ok(Err(e)) => {
      debug!("Connectivity probe to {} failed: {}", addr, e);
      NetworkState::offline()
    }
    Err(_) => {
      debug!("Connectivity probe to {} timed out", addr);
      NetworkState::offline()
    }
  }
}

fn publish(tx: &watch::Sender<NetworkState>, state: NetworkState) {
  tx.send_if_modified(|current| {
    if *current == state {
      return false;
    }
    *current = state;
    true
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::net::TcpListener;

  #[tokio::test]
  async fn test_manual_only_signals_changes() {
    let source = ManualConnectivity::new(NetworkState::offline());
    let mut rx = source.changes();

    source.set_online(false);
    assert!(!rx.has_changed().unwrap());

    source.set_online(true);
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_online());
    assert!(source.fetch().await.unwrap().is_online());
  }

  #[tokio::test]
  async fn test_probe_reaches_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let source = ProbeConnectivity::spawn(addr, Duration::from_secs(60), Duration::from_secs(1));
    let state = source.fetch().await.unwrap();
    assert!(state.is_online());
  }

  #[tokio::test]
  async fn test_probe_reports_offline_when_refused() {
    // Bind then drop to get a port nobody listens on
    let addr = {
      let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
      listener.local_addr().unwrap().to_string()
    };

    let source = ProbeConnectivity::spawn(addr, Duration::from_secs(60), Duration::from_secs(1));
    assert!(source.fetch().await.unwrap().is_offline());
  }
}
