use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::StorageAdapter;

/// In-process storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_entries<R>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> Result<R> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))?;
    Ok(f(&mut entries))
  }
}

impl StorageAdapter for MemoryStorage {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    self.with_entries(|entries| entries.get(key).cloned())
  }

  async fn set(&self, key: &str, value: &str) -> Result<()> {
    self.with_entries(|entries| {
      entries.insert(key.to_string(), value.to_string());
    })
  }

  async fn remove(&self, key: &str) -> Result<()> {
    self.with_entries(|entries| {
      entries.remove(key);
    })
  }

  async fn list_keys(&self) -> Result<Vec<String>> {
    self.with_entries(|entries| entries.keys().cloned().collect())
  }
}
