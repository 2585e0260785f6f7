use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use outfit_sync::config::Config;
use outfit_sync::kv::{KeyValueStore, SqliteStore};
use outfit_sync::network::{ConnectivitySource, ManualConnectivity, NetworkState, ProbeConnectivity};
use outfit_sync::queue::{MutationKind, MutationOperation};
use outfit_sync::remote::HttpMutationHandler;
use outfit_sync::sync::{HandlerRegistry, SyncOutcome};
use outfit_sync::{logging, OfflineRuntime};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "outfit-sync")]
#[command(about = "Offline cache and mutation queue for the outfit recommender")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/outfit-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Treat the network as unavailable; nothing is sent
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show network, queue and cache status
  Status,
  /// List pending mutations, oldest first
  List,
  /// Queue a mutation for later replay
  Enqueue {
    #[arg(long)]
    kind: MutationKind,
    #[arg(long)]
    operation: MutationOperation,
    /// JSON payload
    #[arg(long, default_value = "{}")]
    payload: String,
  },
  /// Replay the queue now
  Sync,
  /// Drop expired cache entries
  Cleanup,
  /// Discard every pending mutation
  ClearQueue,
  /// Discard every cache entry
  ClearCache,
  /// Keep syncing in the background until Ctrl-C
  Run,
}

#[derive(Serialize)]
struct StatusReport {
  network: String,
  online: bool,
  sync: outfit_sync::SyncStatus,
  cache: outfit_sync::CacheStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let log_dir = match &config.logging.directory {
    Some(dir) => dir.clone(),
    None => Config::data_dir()?.join("logs"),
  };
  let _log_guard = logging::init(&log_dir, config.logging.filter.as_deref(), args.verbose)?;

  let store: Arc<dyn KeyValueStore> = Arc::new(match &config.storage.path {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  });

  let connectivity = connectivity(&config, args.offline);
  let handlers = handlers(&config)?;
  let has_remote = config.remote.base_url.is_some();

  let mut runtime = OfflineRuntime::builder(store, connectivity)
    .handlers(handlers)
    .config(config)
    .build();

  // One probe up front so commands see a real state instead of "unknown"
  runtime.network().get_current_state().await;
  runtime.coordinator().refresh_pending_count().await;

  match args.command {
    Command::Status => {
      let network = runtime.network_state();
      print_json(&StatusReport {
        network: network.to_string(),
        online: network.is_online(),
        sync: runtime.sync_status(),
        cache: runtime.cache().status().await,
      })?;
    }
    Command::List => {
      let pending = runtime.queue().try_list().await?;
      print_json(&pending)?;
    }
    Command::Enqueue {
      kind,
      operation,
      payload,
    } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      let id = runtime
        .enqueue(kind, operation, payload)
        .await
        .ok_or_else(|| eyre!("Failed to queue mutation; see the log for details"))?;
      println!("{}", id);
    }
    Command::Sync => {
      if !has_remote {
        return Err(eyre!("No remote configured; set remote.base_url"));
      }
      match runtime.sync_now().await {
        SyncOutcome::Completed(report) => print_json(&report)?,
        SyncOutcome::SkippedOffline => println!("offline, nothing sent"),
        SyncOutcome::SkippedBusy => println!("a sync is already running"),
        SyncOutcome::Aborted => return Err(eyre!("Sync aborted; see the log for details")),
      }
    }
    Command::Cleanup => {
      let removed = runtime.cache().cleanup_expired().await;
      println!("removed {} expired entries", removed);
    }
    Command::ClearQueue => {
      if !runtime.clear_offline_queue().await {
        return Err(eyre!("Failed to clear the queue; see the log for details"));
      }
    }
    Command::ClearCache => {
      let removed = runtime.cache().clear().await;
      println!("removed {} entries", removed);
    }
    Command::Run => {
      if !has_remote {
        return Err(eyre!("No remote configured; set remote.base_url"));
      }
      runtime.start_scheduler();
      info!("Running until interrupted");
      tokio::signal::ctrl_c().await?;
      info!("Interrupted, shutting down");
    }
  }

  runtime.shutdown().await;
  Ok(())
}

fn connectivity(config: &Config, offline: bool) -> Arc<dyn ConnectivitySource> {
  if offline {
    return Arc::new(ManualConnectivity::new(NetworkState::offline()));
  }

  match config.probe_addr() {
    Some(addr) => Arc::new(ProbeConnectivity::spawn(
      addr,
      Duration::from_secs(config.network.probe_interval_secs.max(1)),
      Duration::from_millis(config.network.probe_timeout_ms),
    )),
    // Nothing to probe: no way to tell, so stay offline
    None => Arc::new(ManualConnectivity::new(NetworkState::unknown())),
  }
}

fn handlers(config: &Config) -> Result<HandlerRegistry> {
  let Some(base_url) = &config.remote.base_url else {
    return Ok(HandlerRegistry::new());
  };

  let http = HttpMutationHandler::new(
    base_url,
    Duration::from_secs(config.remote.timeout_secs),
  )?;
  Ok(HandlerRegistry::new().register_all(Arc::new(http)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
