//! SQLite-backed key/value storage.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::StorageAdapter;

/// Schema for the key/value table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Durable storage in a single SQLite file.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::Storage(format!(
        "Failed to open storage database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Default database path under the user's data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("fieldsync").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| Error::Storage(format!("Failed to run storage migrations: {}", e)))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl StorageAdapter for SqliteStorage {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| Error::Storage(format!("Failed to read {}: {}", key, e)))
  }

  async fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| Error::Storage(format!("Failed to write {}: {}", key, e)))?;

    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| Error::Storage(format!("Failed to remove {}: {}", key, e)))?;

    Ok(())
  }

  async fn list_keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT key FROM kv_store ORDER BY key")
      .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| Error::Storage(format!("Failed to list keys: {}", e)))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| Error::Storage(format!("Failed to list keys: {}", e)))?;

    Ok(keys)
  }
}
