//! Persistent key/value storage behind the response cache and mutation queue.
//!
//! The offline layer only needs four operations from a platform store, so any
//! backend that implements [`StorageAdapter`] can be plugged in without
//! touching the rest of the crate.

mod memory;
mod sqlite;

use std::future::Future;

use crate::error::Result;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Minimal async key/value store.
///
/// There are no transactions: each call is independently durable once it
/// resolves.
pub trait StorageAdapter: Send + Sync {
  /// Value stored under `key`, if any.
  fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

  /// Every key currently stored.
  fn list_keys(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}
