//! SQLite-backed key/value store.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::KeyValueStore;
use crate::error::StorageError;

/// Durable store; survives process restarts.
///
/// SQLite calls are blocking, so every operation hops onto the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
  /// Open (or create) the store at the default location.
  pub fn open_default() -> Result<Self, StorageError> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StorageError::Backend(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StorageError::Backend(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  /// Default database path under the platform data directory.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError::Backend("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("outfit-sync").join("store.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| StorageError::Backend(format!("Failed to run store migrations: {}", e)))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let conn = conn
        .lock()
        .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))?;
      f(&conn)
    })
    .await?
  }
}

/// Schema for the key/value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[async_trait]
impl KeyValueStore for SqliteStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        let value = conn
          .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
            row.get(0)
          })
          .optional()?;
        Ok(value)
      })
      .await
  }

  async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
          params![key, value],
        )?;
        Ok(())
      })
      .await
  }

  async fn remove(&self, key: &str) -> Result<(), StorageError> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
      })
      .await
  }

  async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT key FROM kv")?;
        let keys = stmt
          .query_map([], |row| row.get::<_, String>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
      })
      .await
  }
}
