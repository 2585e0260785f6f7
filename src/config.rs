use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub storage: StorageConfig,
  pub cache: CacheConfig,
  pub queue: QueueConfig,
  pub sync: SyncConfig,
  pub remote: RemoteConfig,
  pub network: NetworkConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/outfit-sync/store.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_secs: u64,
  pub weather_ttl_secs: u64,
  pub recommendation_ttl_secs: u64,
  /// How often expired entries are swept; 0 disables the sweep
  pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 30 * 60,
      weather_ttl_secs: 30 * 60,
      recommendation_ttl_secs: 60 * 60,
      cleanup_interval_secs: 15 * 60,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> chrono::Duration {
    secs(self.default_ttl_secs)
  }

  pub fn weather_ttl(&self) -> chrono::Duration {
    secs(self.weather_ttl_secs)
  }

  pub fn recommendation_ttl(&self) -> chrono::Duration {
    secs(self.recommendation_ttl_secs)
  }

  pub fn cleanup_interval(&self) -> Option<Duration> {
    (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
  }
}

fn secs(value: u64) -> chrono::Duration {
  // chrono::Duration tops out at i64::MAX milliseconds
  chrono::Duration::seconds(value.min(i64::MAX as u64 / 1000) as i64)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub max_retries: u32,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_retries: DEFAULT_MAX_RETRIES,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Pause between replayed mutations
  pub pacing_ms: u64,
  /// How often the pending count is refreshed
  pub pending_refresh_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      pacing_ms: 100,
      pending_refresh_secs: 5 * 60,
    }
  }
}

impl SyncConfig {
  pub fn pacing(&self) -> Duration {
    Duration::from_millis(self.pacing_ms)
  }

  pub fn pending_refresh(&self) -> Duration {
    // A zero period would make the interval panic
    Duration::from_secs(self.pending_refresh_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL mutations are replayed against, e.g. https://api.example.com/v1
  pub base_url: Option<String>,
  pub timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// host:port probed to decide reachability (defaults to the remote host)
  pub probe_addr: Option<String>,
  pub probe_interval_secs: u64,
  pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_addr: None,
      probe_interval_secs: 30,
      probe_timeout_ms: 3000,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Directory for log files (defaults to $XDG_DATA_HOME/outfit-sync/logs)
  pub directory: Option<PathBuf>,
  /// tracing filter directive, e.g. "outfit_sync=debug"
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./outfit-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/outfit-sync/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("outfit-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("outfit-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Address to probe for reachability: explicit setting, else the remote host.
  pub fn probe_addr(&self) -> Option<String> {
    if let Some(addr) = &self.network.probe_addr {
      return Some(addr.clone());
    }

    let base = url::Url::parse(self.remote.base_url.as_deref()?).ok()?;
    let host = base.host_str()?;
    let port = base.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
  }

  /// Directory shared by the store and the logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("outfit-sync"))
  }
}
