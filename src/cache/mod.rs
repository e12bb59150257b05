//! Read-through response cache for offline reads.
//!
//! This module maps a request identity (path + query) to the last response
//! the server returned for it:
//! - Entries are written through on every successful online read
//! - Entries older than the TTL read as absent (no background eviction)
//! - Callers invalidate one key, every key containing a fragment, or all keys

mod entry;
mod layer;

pub use entry::{cache_key, CacheEntry, CACHE_PREFIX};
pub use layer::{ResponseCache, DEFAULT_TTL_DAYS};
