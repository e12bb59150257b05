//! Durable FIFO queue of writes made while offline.
//!
//! The whole queue lives under one storage key as a JSON array. Every change
//! reloads it, edits it and writes it back, so the stored value is always a
//! complete, ordered snapshot.
//!
//! Read-modify-write cycles are serialized within this process only. Two
//! processes sharing one store can still lose updates to each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::StorageAdapter;
use crate::transport::{ApiRequest, Method};

/// Storage key of the pending action list.
pub const QUEUE_KEY: &str = "sync_queue";
/// Storage key of the last successful sync time.
pub const LAST_SYNC_KEY: &str = "sync_last";

/// Methods that can be deferred. Reads are never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationMethod {
  Post,
  Patch,
  Put,
  Delete,
}

impl From<MutationMethod> for Method {
  fn from(method: MutationMethod) -> Self {
    match method {
      MutationMethod::Post => Method::Post,
      MutationMethod::Patch => Method::Patch,
      MutationMethod::Put => Method::Put,
      MutationMethod::Delete => Method::Delete,
    }
  }
}

impl fmt::Display for MutationMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Method::from(*self).fmt(f)
  }
}

impl FromStr for MutationMethod {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.parse::<Method>()? {
      Method::Post => Ok(MutationMethod::Post),
      Method::Patch => Ok(MutationMethod::Patch),
      Method::Put => Ok(MutationMethod::Put),
      Method::Delete => Ok(MutationMethod::Delete),
      Method::Get => Err("GET requests are not mutations".to_string()),
    }
  }
}

/// A write waiting to be replayed against the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
  pub id: String,
  pub method: MutationMethod,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
  /// Failed replay attempts so far
  pub retry_count: u32,
  /// Enqueue time. Informational; replay order is queue position.
  pub timestamp: DateTime<Utc>,
}

impl PendingAction {
  /// The request this action replays.
  pub fn to_request(&self) -> ApiRequest {
    ApiRequest::new(self.method.into(), self.path.clone(), self.body.clone())
  }
}

/// `action_<millis>_<random>`; unique per enqueue and never recycled.
fn generate_action_id() -> String {
  let suffix = Uuid::new_v4().simple().to_string();
  format!("action_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// Persisted mutation queue.
pub struct MutationQueue<S: StorageAdapter> {
  storage: Arc<S>,
  write_lock: Arc<Mutex<()>>,
}

impl<S: StorageAdapter> MutationQueue<S> {
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      storage,
      write_lock: Arc::new(Mutex::new(())),
    }
  }

  async fn load(&self) -> Result<Vec<PendingAction>> {
    let raw = match self.storage.get(QUEUE_KEY).await? {
      Some(raw) => raw,
      None => return Ok(Vec::new()),
    };

    match serde_json::from_str(&raw) {
      Ok(queue) => Ok(queue),
      Err(e) => {
        tracing::warn!(error = %e, "sync queue is unreadable, treating it as empty");
        Ok(Vec::new())
      }
    }
  }

  async fn save(&self, queue: &[PendingAction]) -> Result<()> {
    let raw = serde_json::to_string(queue)?;
    self.storage.set(QUEUE_KEY, &raw).await
  }

  /// Append a write and persist the queue. Returns the new action's id.
  pub async fn enqueue(
    &self,
    method: MutationMethod,
    path: &str,
    body: Option<Value>,
  ) -> Result<String> {
    let _guard = self.write_lock.lock().await;

    let mut queue = self.load().await?;
    let action = PendingAction {
      id: generate_action_id(),
      method,
      path: path.to_string(),
      body: body.filter(|b| !b.is_null()),
      retry_count: 0,
      timestamp: Utc::now(),
    };
    let id = action.id.clone();
    queue.push(action);
    self.save(&queue).await?;

    tracing::debug!(%id, %method, path, pending = queue.len(), "queued mutation");
    Ok(id)
  }

  /// Current queue contents in replay order.
  pub async fn snapshot(&self) -> Result<Vec<PendingAction>> {
    self.load().await
  }

  /// Remove one action. Returns whether it was present.
  pub async fn dequeue_by_id(&self, id: &str) -> Result<bool> {
    let _guard = self.write_lock.lock().await;

    let mut queue = self.load().await?;
    let before = queue.len();
    queue.retain(|a| a.id != id);
    if queue.len() == before {
      return Ok(false);
    }
    self.save(&queue).await?;
    Ok(true)
  }

  /// Bump the retry count of one action. Returns the new count, or `None`
  /// if the action is no longer queued.
  pub async fn increment_retry(&self, id: &str) -> Result<Option<u32>> {
    let _guard = self.write_lock.lock().await;

    let mut queue = self.load().await?;
    let retry_count = match queue.iter_mut().find(|a| a.id == id) {
      Some(action) => {
        action.retry_count += 1;
        action.retry_count
      }
      None => return Ok(None),
    };
    self.save(&queue).await?;
    Ok(Some(retry_count))
  }

  pub async fn size(&self) -> Result<usize> {
    Ok(self.load().await?.len())
  }

  /// Drop every pending action and forget the last sync time.
  pub async fn clear(&self) -> Result<()> {
    let _guard = self.write_lock.lock().await;

    self.storage.remove(QUEUE_KEY).await?;
    self.storage.remove(LAST_SYNC_KEY).await
  }

  /// When a sync pass last replayed at least one action.
  pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
    let raw = match self.storage.get(LAST_SYNC_KEY).await? {
      Some(raw) => raw,
      None => return Ok(None),
    };
    Ok(
      DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok(),
    )
  }

  /// Stamp the last sync time with now.
  pub async fn record_sync(&self) -> Result<DateTime<Utc>> {
    let now = Utc::now();
    self.storage.set(LAST_SYNC_KEY, &now.to_rfc3339()).await?;
    Ok(now)
  }
}

impl<S: StorageAdapter> Clone for MutationQueue<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      write_lock: Arc::clone(&self.write_lock),
    }
  }
}
