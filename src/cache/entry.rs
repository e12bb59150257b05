//! Cache entry format and request identity.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Storage key prefix shared by every cached response.
pub const CACHE_PREFIX: &str = "cache:";

/// Cache key for a request: `cache:` + path, plus `?query` when present.
///
/// Identical path and query always map to the same slot; any difference in
/// the query string is a different slot.
pub fn cache_key(path: &str, query: Option<&str>) -> String {
  match query {
    Some(q) if !q.is_empty() => format!("{}{}?{}", CACHE_PREFIX, path, q),
    _ => format!("{}{}", CACHE_PREFIX, path),
  }
}

/// Last successful response for one request identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  /// Response body as returned by the server
  pub data: Value,
  /// When this entry was last written
  pub updated_at: DateTime<Utc>,
  /// Server validator. Kept for future conditional requests, not read back today.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub etag: Option<String>,
}

impl CacheEntry {
  /// New entry stamped with the current time.
  pub fn new(data: Value, etag: Option<String>) -> Self {
    Self {
      data,
      updated_at: Utc::now(),
      etag,
    }
  }

  /// Time since the entry was written.
  pub fn age(&self) -> Duration {
    Utc::now() - self.updated_at
  }

  /// Deserialize the cached body into the caller's type.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
    Ok(serde_json::from_value(self.data.clone())?)
  }
}
