//! Response cache over a storage adapter.

use chrono::Duration;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::StorageAdapter;

use super::entry::{CacheEntry, CACHE_PREFIX};

/// Default time-to-live of cached responses.
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Read-through cache of API responses.
///
/// Staleness is checked when an entry is read; expired entries stay in
/// storage until they are overwritten or invalidated.
pub struct ResponseCache<S: StorageAdapter> {
  storage: Arc<S>,
  /// Entries older than this read as absent
  ttl: Duration,
}

impl<S: StorageAdapter> ResponseCache<S> {
  /// Create a cache with the default TTL.
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      storage,
      ttl: Duration::days(DEFAULT_TTL_DAYS),
    }
  }

  /// Set the time-to-live for cached responses.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  fn is_expired(&self, entry: &CacheEntry) -> bool {
    entry.age() > self.ttl
  }

  /// Fresh entry for `key`, if any.
  ///
  /// Missing, expired and unreadable entries all come back as `None`.
  pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let raw = match self.storage.get(key).await? {
      Some(raw) => raw,
      None => {
        tracing::debug!(key, "cache miss");
        return Ok(None);
      }
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        tracing::warn!(key, error = %e, "ignoring corrupt cache entry");
        return Ok(None);
      }
    };

    if self.is_expired(&entry) {
      tracing::debug!(key, updated_at = %entry.updated_at, "cache entry expired");
      return Ok(None);
    }

    Ok(Some(entry))
  }

  /// Overwrite the entry for `key`, stamping the current time.
  pub async fn set(&self, key: &str, data: Value, etag: Option<String>) -> Result<()> {
    let entry = CacheEntry::new(data, etag);
    let raw = serde_json::to_string(&entry)?;
    self.storage.set(key, &raw).await
  }

  /// Remove exactly one entry.
  pub async fn invalidate(&self, key: &str) -> Result<()> {
    self.storage.remove(key).await
  }

  /// Remove every cached response whose key contains `fragment`.
  ///
  /// Returns the number of entries removed.
  pub async fn invalidate_by_prefix(&self, fragment: &str) -> Result<usize> {
    let mut removed = 0;
    for key in self.storage.list_keys().await? {
      if key.starts_with(CACHE_PREFIX) && key.contains(fragment) {
        self.storage.remove(&key).await?;
        removed += 1;
      }
    }
    tracing::debug!(fragment, removed, "invalidated cache entries");
    Ok(removed)
  }

  /// Remove every cached response. Non-cache keys are left alone.
  pub async fn clear(&self) -> Result<usize> {
    let mut removed = 0;
    for key in self.storage.list_keys().await? {
      if key.starts_with(CACHE_PREFIX) {
        self.storage.remove(&key).await?;
        removed += 1;
      }
    }
    Ok(removed)
  }
}

impl<S: StorageAdapter> Clone for ResponseCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      ttl: self.ttl,
    }
  }
}
