//! Connectivity tracking.
//!
//! The platform reports transitions through a [`ConnectivitySource`];
//! [`NetworkMonitor`] keeps the latest state private and hands it out to
//! callbacks and watchers.

mod monitor;
mod source;

use serde::Serialize;
use std::fmt;

pub use monitor::{NetworkMonitor, Subscription};
pub use source::{ConnectivitySource, ManualConnectivity, ProbeConnectivity};

/// Kind of link the device is on, as far as the platform can tell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
  Wifi,
  Cellular,
  Ethernet,
  Vpn,
  Other,
  /// No link at all
  None,
  #[default]
  Unknown,
}

impl fmt::Display for TransportType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TransportType::Wifi => "wifi",
      TransportType::Cellular => "cellular",
      TransportType::Ethernet => "ethernet",
      TransportType::Vpn => "vpn",
      TransportType::Other => "other",
      TransportType::None => "none",
      TransportType::Unknown => "unknown",
    };
    f.write_str(name)
  }
}

/// Connectivity as last reported. `None` means the platform does not know yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkState {
  pub connected: Option<bool>,
  pub reachable: Option<bool>,
  pub transport: TransportType,
}

impl NetworkState {
  /// Nothing reported yet. Counts as offline.
  pub fn unknown() -> Self {
    Self::default()
  }

  pub fn online(transport: TransportType) -> Self {
    Self {
      connected: Some(true),
      reachable: Some(true),
      transport,
    }
  }

  pub fn offline() -> Self {
    Self {
      connected: Some(false),
      reachable: Some(false),
      transport: TransportType::None,
    }
  }

  /// Connected and reachable, both positively known.
  pub fn is_online(&self) -> bool {
    self.connected == Some(true) && self.reachable == Some(true)
  }

  /// Anything short of online, unknown included.
  pub fn is_offline(&self) -> bool {
    !self.is_online()
  }
}

impl fmt::Display for NetworkState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let status = if self.is_online() { "online" } else { "offline" };
    write!(f, "{} ({})", status, self.transport)
  }
}
