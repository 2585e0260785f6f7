//! Tracing setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "OUTFIT_SYNC_LOG";

const DEFAULT_FILTER: &str = "outfit_sync=info";

/// Install the global subscriber.
///
/// Logs go to a daily rolling file in `directory`; with `stderr` set they are
/// mirrored to the terminal too. Keep the returned guard alive until exit or
/// buffered lines are lost.
pub fn init(directory: &Path, filter: Option<&str>, stderr: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(directory).map_err(|e| {
    eyre!(
      "Failed to create log directory {}: {}",
      directory.display(),
      e
    )
  })?;

  let file_appender = tracing_appender::rolling::daily(directory, "outfit-sync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = fmt::layer()
    .with_writer(file_writer)
    .with_ansi(false)
    .with_filter(build_filter(filter));

  let stderr_layer = stderr.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .with_filter(build_filter(filter))
  });

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

fn build_filter(configured: Option<&str>) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV)
    .ok()
    .or_else(|| configured.and_then(|f| EnvFilter::try_new(f).ok()))
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
