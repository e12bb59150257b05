//! Offline-first data layer for field-operations clients.
//!
//! Reads are cached as they come back from the API and served from that
//! cache while offline. Writes made offline are persisted to a queue and
//! replayed in order once connectivity returns, with bounded retries and the
//! server's state winning any conflict.
//!
//! [`OfflineApi`] is the entry point; it is built once per process from a
//! [`StorageAdapter`], a [`Transport`] and a [`NetworkMonitor`].

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod network;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{GetOptions, OfflineApi, SyncStatus};
pub use cache::{cache_key, CacheEntry, ResponseCache};
pub use config::Config;
pub use error::{Error, Result};
pub use network::{NetworkMonitor, Probe, Subscription};
pub use queue::{MutationMethod, MutationQueue, PendingAction};
pub use storage::{MemoryStorage, SqliteStorage, StorageAdapter};
pub use sync::{SyncEngine, SyncReport};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
