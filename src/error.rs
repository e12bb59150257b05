//! Error type for the offline data layer.
//!
//! `Queued` and `NoCachedData` are signals about connectivity rather than
//! faults: callers branch on them to show "will sync when online" or "not
//! available offline" instead of a server error.

use thiserror::Error;

use crate::transport::Method;

#[derive(Error, Debug)]
pub enum Error {
  /// Offline read with nothing usable in the response cache.
  #[error("Offline: no cached data for {path}")]
  NoCachedData { path: String },

  /// Offline write, persisted to the mutation queue under `id`.
  #[error("Offline: queued for sync ({id})")]
  Queued { id: String },

  /// The server answered with a non-2xx status.
  #[error("{method} {path}: {status}")]
  Http {
    method: Method,
    path: String,
    status: u16,
    body: String,
  },

  /// The request never produced a response (DNS, connect, timeout, ...).
  #[error("Transport error: {0}")]
  Transport(String),

  /// A body could not be read as JSON or as the requested type.
  #[error("Invalid JSON: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("Storage error: {0}")]
  Storage(String),
}

impl Error {
  /// Queue id when this is the offline "queued" signal.
  pub fn queued_id(&self) -> Option<&str> {
    match self {
      Error::Queued { id } => Some(id),
      _ => None,
    }
  }

  pub fn is_queued(&self) -> bool {
    matches!(self, Error::Queued { .. })
  }

  /// HTTP status when the server rejected the request.
  pub fn status(&self) -> Option<u16> {
    match self {
      Error::Http { status, .. } => Some(*status),
      _ => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
