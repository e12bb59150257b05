//! Offline-aware API client.
//!
//! Reads: online → fetch and write through to the cache; offline → serve
//! from cache or fail with [`Error::NoCachedData`].
//! Writes: online → send; offline → queue and return [`Error::Queued`].
//! Queued writes are replayed by [`OfflineApi::perform_sync`], which
//! [`OfflineApi::spawn_auto_sync`] runs whenever the network comes back.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::cache::{cache_key, ResponseCache};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::NetworkMonitor;
use crate::queue::{MutationMethod, MutationQueue};
use crate::storage::StorageAdapter;
use crate::sync::{SyncEngine, SyncReport};
use crate::transport::{ApiRequest, Method, Transport};

/// Options for [`OfflineApi::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
  /// Return `Ok(None)` instead of failing when the server answers 404
  /// (e.g. `/users/me` before enrollment)
  pub return_null_on_404: bool,
}

impl GetOptions {
  pub fn null_on_404() -> Self {
    Self {
      return_null_on_404: true,
    }
  }
}

/// What a status banner needs: offline, syncing, or N changes queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
  pub online: bool,
  pub syncing: bool,
  pub pending_count: usize,
  pub last_sync_at: Option<DateTime<Utc>>,
}

/// Clears the syncing flag even if the pass is cancelled.
struct SyncingFlag<'a>(&'a AtomicBool);

impl<'a> SyncingFlag<'a> {
  fn raise(flag: &'a AtomicBool) -> Self {
    flag.store(true, Ordering::SeqCst);
    Self(flag)
  }
}

impl Drop for SyncingFlag<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// Single entry point for reads and writes.
///
/// Owns the response cache and the mutation queue; both persist through the
/// storage adapter it was built with.
pub struct OfflineApi<S: StorageAdapter, T: Transport> {
  cache: ResponseCache<S>,
  queue: MutationQueue<S>,
  engine: SyncEngine,
  transport: T,
  network: NetworkMonitor,
  /// Held for the duration of a sync pass so passes never overlap
  sync_lock: Mutex<()>,
  syncing: AtomicBool,
}

impl<S: StorageAdapter, T: Transport> OfflineApi<S, T> {
  pub fn new(storage: Arc<S>, transport: T, network: NetworkMonitor) -> Self {
    Self {
      cache: ResponseCache::new(Arc::clone(&storage)),
      queue: MutationQueue::new(storage),
      engine: SyncEngine::new(),
      transport,
      network,
      sync_lock: Mutex::new(()),
      syncing: AtomicBool::new(false),
    }
  }

  /// Build with cache TTL and sync settings taken from `config`.
  pub fn from_config(
    config: &Config,
    storage: Arc<S>,
    transport: T,
    network: NetworkMonitor,
  ) -> Self {
    Self::new(storage, transport, network)
      .with_cache_ttl(config.cache_ttl())
      .with_sync_engine(
        SyncEngine::new()
          .with_max_retries(config.sync.max_retries)
          .with_action_timeout(config.action_timeout()),
      )
  }

  pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
    self.cache = self.cache.with_ttl(ttl);
    self
  }

  pub fn with_sync_engine(mut self, engine: SyncEngine) -> Self {
    self.engine = engine;
    self
  }

  /// The response cache, for caller-driven invalidation.
  pub fn cache(&self) -> &ResponseCache<S> {
    &self.cache
  }

  pub fn network(&self) -> &NetworkMonitor {
    &self.network
  }

  pub fn is_online(&self) -> bool {
    self.network.is_online()
  }

  /// GET `path` (with optional `query`), decoded as `R`.
  ///
  /// `Ok(None)` only for a 404 with [`GetOptions::return_null_on_404`].
  /// Online failures fall back to a fresh cached copy before surfacing.
  pub async fn get<R: DeserializeOwned>(
    &self,
    path: &str,
    query: Option<&str>,
    opts: GetOptions,
  ) -> Result<Option<R>> {
    let key = cache_key(path, query);

    if !self.network.is_online() {
      return match self.cache.get(&key).await? {
        Some(entry) => {
          tracing::debug!(%key, "offline read served from cache");
          Ok(Some(entry.decode()?))
        }
        None => Err(Error::NoCachedData {
          path: path.to_string(),
        }),
      };
    }

    let full_path = match query {
      Some(q) if !q.is_empty() => format!("{}?{}", path, q),
      _ => path.to_string(),
    };

    let failure = match self.transport.send(ApiRequest::get(full_path)).await {
      Ok(response) if response.status == 404 && opts.return_null_on_404 => return Ok(None),
      Ok(response) if response.is_success() => {
        let data = response.json()?;
        self.cache.set(&key, data.clone(), response.etag).await?;
        return Ok(Some(serde_json::from_value(data)?));
      }
      Ok(response) => Error::Http {
        method: Method::Get,
        path: path.to_string(),
        status: response.status,
        body: response.body,
      },
      Err(e) => e,
    };

    match self.cache.get(&key).await? {
      Some(entry) => {
        tracing::warn!(%key, error = %failure, "online read failed, serving cached copy");
        Ok(Some(entry.decode()?))
      }
      None => Err(failure),
    }
  }

  /// Send a write, or queue it when offline.
  ///
  /// Offline, the action is persisted first and then reported as
  /// [`Error::Queued`] carrying its queue id. Online writes never touch the
  /// queue: a rejected write is returned as [`Error::Http`].
  pub async fn mutate<R: DeserializeOwned>(
    &self,
    method: MutationMethod,
    path: &str,
    body: Option<Value>,
  ) -> Result<R> {
    if !self.network.is_online() {
      let id = self.queue.enqueue(method, path, body).await?;
      tracing::info!(%id, %method, path, "offline, write queued for sync");
      return Err(Error::Queued { id });
    }

    let response = self
      .transport
      .send(ApiRequest::new(method.into(), path, body))
      .await?;

    if !response.is_success() {
      return Err(Error::Http {
        method: method.into(),
        path: path.to_string(),
        status: response.status,
        body: response.body,
      });
    }

    Ok(serde_json::from_value(response.json()?)?)
  }

  /// Replay the mutation queue once.
  ///
  /// A pass started while another is running waits for it to finish.
  pub async fn perform_sync(&self) -> Result<SyncReport> {
    let _pass = self.sync_lock.lock().await;
    let _flag = SyncingFlag::raise(&self.syncing);

    self.engine.process_queue(&self.queue, &self.transport).await
  }

  pub async fn pending_count(&self) -> Result<usize> {
    self.queue.size().await
  }

  pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
    self.queue.last_sync_at().await
  }

  pub fn is_syncing(&self) -> bool {
    self.syncing.load(Ordering::SeqCst)
  }

  pub async fn status(&self) -> Result<SyncStatus> {
    Ok(SyncStatus {
      online: self.is_online(),
      syncing: self.is_syncing(),
      pending_count: self.pending_count().await?,
      last_sync_at: self.last_sync_at().await?,
    })
  }

  /// Remove one cached response.
  pub async fn invalidate(&self, path: &str, query: Option<&str>) -> Result<()> {
    self.cache.invalidate(&cache_key(path, query)).await
  }

  /// Remove every cached response whose key contains `fragment`.
  pub async fn invalidate_by_prefix(&self, fragment: &str) -> Result<usize> {
    self.cache.invalidate_by_prefix(fragment).await
  }

  pub async fn clear_cache(&self) -> Result<usize> {
    self.cache.clear().await
  }

  /// Forget all offline state (logout): cached responses, pending writes and
  /// the last sync time.
  pub async fn reset(&self) -> Result<()> {
    self.cache.clear().await?;
    self.queue.clear().await
  }
}

impl<S, T> OfflineApi<S, T>
where
  S: StorageAdapter + 'static,
  T: Transport + 'static,
{
  /// Run a sync pass on every offline→online transition until aborted.
  pub fn spawn_auto_sync(self: &Arc<Self>) -> JoinHandle<()> {
    let api = Arc::clone(self);
    let mut transitions = self.network.transitions();

    tokio::spawn(async move {
      loop {
        match transitions.recv().await {
          Ok(true) => api.sync_after_reconnect().await,
          Ok(false) => {}
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            tracing::warn!(missed, "auto-sync fell behind on network transitions");
            if api.is_online() {
              api.sync_after_reconnect().await;
            }
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    })
  }

  async fn sync_after_reconnect(&self) {
    match self.perform_sync().await {
      Ok(report) if report.synced > 0 || report.failed > 0 => {
        tracing::info!(
          synced = report.synced,
          failed = report.failed,
          "back online, queue replayed"
        );
      }
      Ok(_) => {}
      Err(e) => tracing::error!(error = %e, "sync after reconnect failed"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStorage;
  use crate::testing::ScriptedTransport;
  use serde::Deserialize;
  use serde_json::json;
  use std::time::Duration as StdDuration;

  #[derive(Debug, PartialEq, Deserialize)]
  struct Site {
    id: u64,
    name: String,
  }

  fn api(online: bool) -> (OfflineApi<MemoryStorage, ScriptedTransport>, ScriptedTransport) {
    let transport = ScriptedTransport::new();
    let api = OfflineApi::new(
      Arc::new(MemoryStorage::new()),
      transport.clone(),
      NetworkMonitor::new(online),
    );
    (api, transport)
  }

  #[tokio::test]
  async fn test_online_read_writes_through_then_serves_offline() {
    let (api, transport) = api(true);
    transport.respond(Method::Get, "/sites/current", 200, r#"{"id":1,"name":"Site A"}"#);

    let site: Site = api
      .get("/sites/current", None, GetOptions::default())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(
      site,
      Site {
        id: 1,
        name: "Site A".to_string()
      }
    );
    let entry = api.cache().get("cache:/sites/current").await.unwrap().unwrap();
    assert_eq!(entry.data, json!({"id": 1, "name": "Site A"}));

    api.network().set_online(false);
    let cached: Site = api
      .get("/sites/current", None, GetOptions::default())
      .await
      .unwrap()
      .unwrap();

    assert_eq!(cached, site);
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_query_is_part_of_request_and_key() {
    let (api, transport) = api(true);
    transport.respond(Method::Get, "/tasks?siteId=4", 200, "[1,2]");

    let tasks: Vec<u32> = api
      .get("/tasks", Some("siteId=4"), GetOptions::default())
      .await
      .unwrap()
      .unwrap();

    assert_eq!(tasks, vec![1, 2]);
    assert_eq!(transport.paths(), vec!["/tasks?siteId=4"]);
    assert!(api
      .cache()
      .get("cache:/tasks?siteId=4")
      .await
      .unwrap()
      .is_some());
    assert!(api.cache().get("cache:/tasks").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_offline_read_without_cache() {
    let (api, transport) = api(false);

    let err = api
      .get::<Value>("/stock", None, GetOptions::default())
      .await
      .unwrap_err();

    assert!(matches!(err, Error::NoCachedData { ref path } if path == "/stock"));
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_404_as_null() {
    let (api, transport) = api(true);
    transport.respond(Method::Get, "/users/me", 404, "");

    let me: Option<Value> = api
      .get("/users/me", None, GetOptions::null_on_404())
      .await
      .unwrap();

    assert!(me.is_none());
  }

  #[tokio::test]
  async fn test_404_without_option_falls_back_then_fails() {
    let (api, transport) = api(true);
    transport.respond(Method::Get, "/users/me", 404, "");

    let err = api
      .get::<Value>("/users/me", None, GetOptions::default())
      .await
      .unwrap_err();
    assert_eq!(err.status(), Some(404));

    api
      .cache()
      .set("cache:/users/me", json!({"id": 5}), None)
      .await
      .unwrap();
    let me: Value = api
      .get("/users/me", None, GetOptions::default())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(me, json!({"id": 5}));
  }

  #[tokio::test]
  async fn test_server_error_falls_back_to_cache() {
    let (api, transport) = api(true);
    transport.respond(Method::Get, "/bills", 200, "[10]");
    let _: Option<Value> = api.get("/bills", None, GetOptions::default()).await.unwrap();

    transport.respond(Method::Get, "/bills", 500, "oops");
    let bills: Value = api
      .get("/bills", None, GetOptions::default())
      .await
      .unwrap()
      .unwrap();

    assert_eq!(bills, json!([10]));
  }

  #[tokio::test]
  async fn test_unreachable_while_online_falls_back_to_cache() {
    let (api, transport) = api(true);
    transport.unreachable(Method::Get, "/permits");

    let err = api
      .get::<Value>("/permits", None, GetOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    api
      .cache()
      .set("cache:/permits", json!([]), None)
      .await
      .unwrap();
    let permits: Value = api
      .get("/permits", None, GetOptions::default())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(permits, json!([]));
  }

  #[tokio::test]
  async fn test_offline_write_queues_without_network() {
    let (api, transport) = api(false);

    let err = api
      .mutate::<Value>(
        MutationMethod::Post,
        "/attendance",
        Some(json!({"workerId": 12})),
      )
      .await
      .unwrap_err();

    let id = err.queued_id().expect("queued signal").to_string();
    assert_eq!(transport.call_count(), 0);
    assert_eq!(api.pending_count().await.unwrap(), 1);
    let snapshot = api.queue.snapshot().await.unwrap();
    assert_eq!(snapshot[0].id, id);
    assert_eq!(snapshot[0].body, Some(json!({"workerId": 12})));
  }

  #[tokio::test]
  async fn test_online_write_never_touches_queue() {
    let (api, transport) = api(true);
    transport.respond(Method::Post, "/tasks", 201, r#"{"id":3}"#);
    transport.respond(Method::Patch, "/tasks/3", 422, r#"{"error":"bad"}"#);

    let created: Value = api
      .mutate(MutationMethod::Post, "/tasks", Some(json!({"title": "Pour slab"})))
      .await
      .unwrap();
    assert_eq!(created, json!({"id": 3}));

    let err = api
      .mutate::<Value>(MutationMethod::Patch, "/tasks/3", Some(json!({})))
      .await
      .unwrap_err();
    assert_eq!(err.status(), Some(422));

    assert_eq!(api.pending_count().await.unwrap(), 0);
    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test]
  async fn test_online_write_with_empty_response() {
    let (api, transport) = api(true);
    transport.respond(Method::Delete, "/tools/1", 204, "");

    api
      .mutate::<()>(MutationMethod::Delete, "/tools/1", None)
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_reconnect_scenario() {
    let (api, transport) = api(false);
    transport.respond(Method::Post, "/bills", 500, "");

    for (method, path) in [
      (MutationMethod::Post, "/attendance"),
      (MutationMethod::Post, "/bills"),
      (MutationMethod::Patch, "/tasks/8"),
    ] {
      let err = api
        .mutate::<Value>(method, path, Some(json!({"n": 1})))
        .await
        .unwrap_err();
      assert!(err.is_queued());
    }
    assert_eq!(api.pending_count().await.unwrap(), 3);

    api.network().set_online(true);
    let report = api.perform_sync().await.unwrap();

    assert_eq!((report.synced, report.failed), (2, 1));
    let remaining = api.queue.snapshot().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].path, "/bills");
    assert_eq!(remaining[0].retry_count, 1);
    assert_eq!(transport.paths(), vec!["/attendance", "/bills", "/tasks/8"]);
  }

  #[tokio::test]
  async fn test_status() {
    let (api, _) = api(false);
    let _ = api
      .mutate::<Value>(MutationMethod::Post, "/a", None)
      .await;

    let status = api.status().await.unwrap();
    assert_eq!(
      status,
      SyncStatus {
        online: false,
        syncing: false,
        pending_count: 1,
        last_sync_at: None,
      }
    );

    api.network().set_online(true);
    api.perform_sync().await.unwrap();
    let status = api.status().await.unwrap();
    assert!(status.online);
    assert!(!status.syncing);
    assert_eq!(status.pending_count, 0);
    assert!(status.last_sync_at.is_some());
  }

  #[tokio::test]
  async fn test_reset_clears_cache_and_queue() {
    let (api, _) = api(false);
    api
      .cache()
      .set("cache:/sites/current", json!({}), None)
      .await
      .unwrap();
    let _ = api
      .mutate::<Value>(MutationMethod::Post, "/a", None)
      .await;

    api.reset().await.unwrap();

    assert_eq!(api.pending_count().await.unwrap(), 0);
    assert!(api
      .cache()
      .get("cache:/sites/current")
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_invalidate_helpers() {
    let (api, _) = api(true);
    api
      .cache()
      .set(&cache_key("/tasks", Some("s=1")), json!([]), None)
      .await
      .unwrap();
    api
      .cache()
      .set(&cache_key("/tasks", Some("s=2")), json!([]), None)
      .await
      .unwrap();
    api
      .cache()
      .set(&cache_key("/stock", None), json!([]), None)
      .await
      .unwrap();

    api.invalidate("/tasks", Some("s=1")).await.unwrap();
    assert_eq!(api.invalidate_by_prefix("/tasks").await.unwrap(), 1);
    assert_eq!(api.clear_cache().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_auto_sync_on_reconnect() {
    let (api, transport) = api(false);
    let api = Arc::new(api);
    let _ = api
      .mutate::<Value>(MutationMethod::Post, "/attendance", None)
      .await;
    let handle = api.spawn_auto_sync();
    tokio::task::yield_now().await;

    api.network().set_online(true);

    let mut waited = 0;
    while api.pending_count().await.unwrap() > 0 && waited < 100 {
      tokio::time::sleep(StdDuration::from_millis(10)).await;
      waited += 1;
    }
    handle.abort();

    assert_eq!(api.pending_count().await.unwrap(), 0);
    assert_eq!(transport.paths(), vec!["/attendance"]);
  }

  #[tokio::test]
  async fn test_auto_sync_runs_for_each_quick_reconnect() {
    let (api, transport) = api(false);
    transport.respond(Method::Post, "/bills", 500, "{}");
    let api = Arc::new(api);
    let _ = api
      .mutate::<Value>(MutationMethod::Post, "/bills", Some(json!({"amount": 10})))
      .await;
    let handle = api.spawn_auto_sync();

    api.network().set_online(true);
    api.network().set_online(false);
    api.network().set_online(true);

    let mut waited = 0;
    while transport.call_count() < 2 && waited < 100 {
      tokio::time::sleep(StdDuration::from_millis(10)).await;
      waited += 1;
    }
    handle.abort();

    assert_eq!(transport.call_count(), 2);
    let snapshot = api.queue.snapshot().await.unwrap();
    assert_eq!(snapshot[0].retry_count, 2);
  }
}
