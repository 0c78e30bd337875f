//! Offline cache manager: lifecycle, request strategies, and maintenance.

use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::event::{Notice, NoticeHub};
use crate::net::{FetchedResponse, Fetcher};
use crate::policy::{CachePolicy, Destination, StashRequest, StoreNames, Strategy};

use super::storage::{CacheStorage, CachedResponse};

/// Lifecycle states of the manager.
///
/// Install never fails on partial cache misses; activation prunes stale
/// stores before `Activated` is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  New,
  Installing,
  Installed,
  Activating,
  Activated,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedSource {
  Network,
  Cache,
  OfflinePage,
  Unavailable,
}

/// Response handed back to the interception surface.
#[derive(Debug, Clone)]
pub struct Served {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ServedSource,
}

impl Served {
  fn network(response: FetchedResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers,
      body: response.body,
      source: ServedSource::Network,
    }
  }

  fn cached(entry: CachedResponse, source: ServedSource) -> Self {
    Self {
      status: entry.status,
      headers: entry.headers,
      body: entry.body,
      source,
    }
  }

  /// The synthesized last-resort response.
  fn unavailable() -> Self {
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: b"Offline content not available".to_vec(),
      source: ServedSource::Unavailable,
    }
  }
}

/// Per-store diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
  pub name: String,
  pub size: usize,
  pub urls: Vec<String>,
}

/// Decides, per request, whether to serve from cache or network, and keeps
/// the stores populated and pruned.
pub struct CacheManager<S, F> {
  policy: CachePolicy,
  stores: StoreNames,
  storage: Arc<S>,
  fetcher: Arc<F>,
  state: Mutex<Lifecycle>,
  notices: NoticeHub,
}

impl<S: CacheStorage, F: Fetcher> CacheManager<S, F> {
  pub fn new(policy: CachePolicy, storage: Arc<S>, fetcher: Arc<F>) -> Self {
    let stores = policy.stores();
    Self {
      policy,
      stores,
      storage,
      fetcher,
      state: Mutex::new(Lifecycle::New),
      notices: NoticeHub::new(),
    }
  }

  pub fn version(&self) -> &str {
    &self.policy.version
  }

  /// Resolve a site-relative path to an absolute URL.
  pub fn resolve(&self, target: &str) -> Result<String> {
    self.policy.resolve(target)
  }

  pub fn notices(&self) -> &NoticeHub {
    &self.notices
  }

  pub fn state(&self) -> Result<Lifecycle> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(*state)
  }

  fn set_state(&self, next: Lifecycle) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    debug!(from = ?*state, to = ?next, "Lifecycle transition");
    *state = next;
    Ok(())
  }

  /// Populate the static store with the core file set.
  ///
  /// Best-effort: a failed file is logged and skipped, and install always
  /// reaches `Installed`.
  pub async fn install(&self) -> Result<()> {
    self.set_state(Lifecycle::Installing)?;
    info!(version = %self.policy.version, "Installing");

    let store = self.stores.static_store();
    self.storage.open_store(&store)?;

    let cached = self.cache_all(&store, &self.policy.core_files).await;
    info!(cached, total = self.policy.core_files.len(), "Core files cached");

    self.set_state(Lifecycle::Installed)?;
    Ok(())
  }

  /// Prune stale-version stores and publish readiness.
  ///
  /// The static asset warm-up is deliberately not part of activation;
  /// callers run [`warm_static_assets`](Self::warm_static_assets) afterwards.
  pub async fn activate(&self) -> Result<()> {
    self.set_state(Lifecycle::Activating)?;
    info!(version = %self.policy.version, "Activating");

    let removed = self.prune_stale()?;
    if !removed.is_empty() {
      info!(removed = removed.len(), "Old cache stores deleted");
    }

    self.set_state(Lifecycle::Activated)?;
    info!("Activated");
    Ok(())
  }

  /// Force immediate activation from the waiting state.
  pub async fn skip_waiting(&self) -> Result<()> {
    if self.state()? == Lifecycle::Installed {
      self.activate().await?;
    }
    Ok(())
  }

  /// Delete every store whose name lacks the current version tag.
  pub fn prune_stale(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for name in self.storage.store_names()? {
      if !self.stores.is_current(&name) {
        info!(store = %name, "Deleting old cache store");
        if self.storage.delete_store(&name)? {
          removed.push(name);
        }
      }
    }
    Ok(removed)
  }

  /// Cache the static asset list into the static store.
  pub async fn warm_static_assets(&self) -> usize {
    let store = self.stores.static_store();
    let cached = self.cache_all(&store, &self.policy.static_assets).await;
    info!(cached, total = self.policy.static_assets.len(), "Static assets cached");
    cached
  }

  /// Re-fetch the whole core file set into the static store.
  pub async fn refresh_core(&self) -> usize {
    let store = self.stores.static_store();
    let refreshed = self.cache_all(&store, &self.policy.core_files).await;
    info!(refreshed, "Cache update completed");
    self.notices.publish(Notice::CacheUpdated { refreshed });
    refreshed
  }

  /// Cache an arbitrary URL list into the dynamic store.
  pub async fn cache_urls(&self, urls: &[String]) -> usize {
    let store = self.stores.dynamic_store();
    let cached = self.cache_all(&store, urls).await;
    info!(cached, total = urls.len(), "URL caching completed");
    cached
  }

  /// Fan-out fetch of `targets` into `store`, each URL awaited
  /// independently. Returns how many were cached.
  async fn cache_all(&self, store: &str, targets: &[String]) -> usize {
    let results = join_all(targets.iter().map(|t| self.cache_one(store, t))).await;
    results.into_iter().filter(|cached| *cached).count()
  }

  async fn cache_one(&self, store: &str, target: &str) -> bool {
    let url = match self.policy.resolve(target) {
      Ok(url) => url,
      Err(e) => {
        warn!(target = %target, error = %e, "Skipping unresolvable cache target");
        return false;
      }
    };

    match self.fetcher.fetch(&url).await {
      Ok(response) if response.ok() => {
        let entry = CachedResponse::new(&url, response.status, response.headers, response.body);
        match self.storage.put(store, &entry) {
          Ok(()) => {
            debug!(url = %url, store = %store, "Cached");
            true
          }
          Err(e) => {
            warn!(url = %url, error = %e, "Failed to store cached response");
            false
          }
        }
      }
      Ok(response) => {
        warn!(url = %url, status = response.status, "Skipping non-ok response");
        false
      }
      Err(e) => {
        warn!(url = %url, error = %e, "Failed to fetch");
        false
      }
    }
  }

  /// Resolve one intercepted GET request via the routing table.
  ///
  /// Total: every failure tier ends in the synthesized 503, never an error.
  pub async fn handle_request(&self, request: &StashRequest) -> Served {
    let route = self.policy.routes.route(request.destination);
    let store = self.stores.for_kind(route.store);

    match route.strategy {
      Strategy::NetworkFirst => self.network_first(request, &store).await,
      Strategy::CacheFirst => self.cache_first(request, &store).await,
    }
  }

  async fn network_first(&self, request: &StashRequest, store: &str) -> Served {
    match self.fetcher.fetch(&request.url).await {
      Ok(response) => {
        if response.ok() {
          self.store_copy(store, &request.url, &response);
        }
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed, trying cache");

        if let Some(hit) = self.lookup(&request.url) {
          debug!(url = %request.url, "Serving from cache");
          return Served::cached(hit, ServedSource::Cache);
        }

        if request.destination == Destination::Document {
          if let Some(page) = self.offline_page() {
            debug!(url = %request.url, "Serving offline page");
            return Served::cached(page, ServedSource::OfflinePage);
          }
        }

        Served::unavailable()
      }
    }
  }

  async fn cache_first(&self, request: &StashRequest, store: &str) -> Served {
    if let Some(hit) = self.lookup(&request.url) {
      debug!(url = %request.url, "Serving from cache (cache first)");
      return Served::cached(hit, ServedSource::Cache);
    }

    match self.fetcher.fetch(&request.url).await {
      Ok(response) => {
        if response.ok() {
          self.store_copy(store, &request.url, &response);
        }
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Cache and network failed");
        Served::unavailable()
      }
    }
  }

  /// Ad hoc caching that consults the runtime store only.
  pub async fn runtime_fetch(&self, url: &str) -> Served {
    let store = self.stores.runtime_store();

    let hit = match self.storage.get(&store, url) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %url, error = %e, "Runtime cache lookup failed");
        None
      }
    };
    if let Some(hit) = hit {
      return Served::cached(hit, ServedSource::Cache);
    }

    match self.fetcher.fetch(url).await {
      Ok(response) => {
        if response.ok() {
          self.store_copy(&store, url, &response);
        }
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %url, error = %e, "Runtime fetch failed");
        Served::unavailable()
      }
    }
  }

  fn store_copy(&self, store: &str, url: &str, response: &FetchedResponse) {
    let entry = CachedResponse::new(url, response.status, response.headers.clone(), response.body.clone());
    if let Err(e) = self.storage.put(store, &entry) {
      warn!(url = %url, error = %e, "Failed to cache response");
    } else {
      debug!(url = %url, store = %store, "Network response cached");
    }
  }

  /// Cache lookup across all stores; storage errors count as a miss.
  fn lookup(&self, url: &str) -> Option<CachedResponse> {
    match self.storage.match_url(url) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  fn offline_page(&self) -> Option<CachedResponse> {
    let url = self.policy.offline_url().ok()?;
    self.lookup(&url)
  }

  /// Every store with its entry count and URL list.
  pub fn cache_info(&self) -> Result<Vec<StoreInfo>> {
    let mut info = Vec::new();
    for name in self.storage.store_names()? {
      let urls = self.storage.urls(&name)?;
      info.push(StoreInfo {
        name,
        size: urls.len(),
        urls,
      });
    }
    Ok(info)
  }

  /// Delete one named store.
  pub fn delete_cache(&self, name: &str) -> Result<bool> {
    let deleted = self.storage.delete_store(name)?;
    info!(store = %name, deleted, "Cache deleted");
    Ok(deleted)
  }

  /// Notify subscribers that a background sync ran.
  pub async fn background_sync(&self) {
    info!("Processing background sync");
    self.notices.publish(Notice::BackgroundSync {
      message: "Background sync completed".to_string(),
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::policy::RouteTable;
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use url::Url;

  struct FakeFetcher {
    responses: Mutex<HashMap<String, FetchedResponse>>,
    offline: AtomicBool,
    calls: AtomicUsize,
  }

  impl FakeFetcher {
    fn new() -> Self {
      Self {
        responses: Mutex::new(HashMap::new()),
        offline: AtomicBool::new(false),
        calls: AtomicUsize::new(0),
      }
    }

    fn serve(&self, url: &str, status: u16, body: &str) {
      self.responses.lock().unwrap().insert(
        url.to_string(),
        FetchedResponse {
          status,
          headers: vec![("content-type".to_string(), "text/plain".to_string())],
          body: body.as_bytes().to_vec(),
        },
      );
    }

    fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("connection refused"));
      }
      match self.responses.lock().unwrap().get(url) {
        Some(response) => Ok(response.clone()),
        None => Err(eyre!("no route to {}", url)),
      }
    }
  }

  fn policy_with_core(core_files: &[&str]) -> CachePolicy {
    CachePolicy {
      version: "site-v2".to_string(),
      origin: Url::parse("https://example.com").unwrap(),
      core_files: core_files.iter().map(|s| s.to_string()).collect(),
      static_assets: vec!["/icons/icon-192x192.png".to_string()],
      offline_path: "/offline.html".to_string(),
      routes: RouteTable::default(),
    }
  }

  fn manager_with_core(
    core_files: &[&str],
  ) -> (
    CacheManager<MemoryStorage, FakeFetcher>,
    Arc<MemoryStorage>,
    Arc<FakeFetcher>,
  ) {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(FakeFetcher::new());
    let manager = CacheManager::new(policy_with_core(core_files), storage.clone(), fetcher.clone());
    (manager, storage, fetcher)
  }

  fn document(url: &str) -> StashRequest {
    StashRequest {
      url: url.to_string(),
      destination: Destination::Document,
    }
  }

  fn style(url: &str) -> StashRequest {
    StashRequest {
      url: url.to_string(),
      destination: Destination::Style,
    }
  }

  #[tokio::test]
  async fn test_install_tolerates_individual_failures() {
    let (manager, storage, fetcher) = manager_with_core(&["/", "/index.html"]);
    fetcher.serve("https://example.com/", 200, "home");
    // /index.html not served: the fetch fails

    manager.install().await.unwrap();

    assert_eq!(manager.state().unwrap(), Lifecycle::Installed);
    assert_eq!(
      storage.urls("site-v2-static").unwrap(),
      vec!["https://example.com/"]
    );
  }

  #[tokio::test]
  async fn test_install_opens_static_store_even_when_everything_fails() {
    let (manager, storage, fetcher) = manager_with_core(&["/"]);
    fetcher.set_offline(true);

    manager.install().await.unwrap();

    assert_eq!(manager.state().unwrap(), Lifecycle::Installed);
    assert_eq!(storage.store_names().unwrap(), vec!["site-v2-static"]);
    assert!(storage.urls("site-v2-static").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_prunes_stale_stores() {
    let (manager, storage, _fetcher) = manager_with_core(&[]);
    let old = CachedResponse::new("https://example.com/old", 200, Vec::new(), b"old".to_vec());
    storage.put("site-v1-static", &old).unwrap();
    storage.put("site-v1-dynamic", &old).unwrap();
    storage.open_store("site-v2-static").unwrap();

    manager.activate().await.unwrap();

    assert_eq!(manager.state().unwrap(), Lifecycle::Activated);
    assert_eq!(storage.store_names().unwrap(), vec!["site-v2-static"]);
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_from_installed() {
    let (manager, _storage, _fetcher) = manager_with_core(&[]);
    manager.install().await.unwrap();
    assert_eq!(manager.state().unwrap(), Lifecycle::Installed);

    manager.skip_waiting().await.unwrap();
    assert_eq!(manager.state().unwrap(), Lifecycle::Activated);
  }

  #[tokio::test]
  async fn test_cache_first_hit_never_touches_network() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    let entry = CachedResponse::new(
      "https://example.com/styles.css",
      200,
      Vec::new(),
      b"body {}".to_vec(),
    );
    storage.put("site-v2-static", &entry).unwrap();

    let served = manager.handle_request(&style("https://example.com/styles.css")).await;

    assert_eq!(served.source, ServedSource::Cache);
    assert_eq!(served.body, b"body {}");
    assert_eq!(fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_and_stores() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    fetcher.serve("https://example.com/styles.css", 200, "body {}");

    let served = manager.handle_request(&style("https://example.com/styles.css")).await;

    assert_eq!(served.source, ServedSource::Network);
    assert_eq!(fetcher.calls(), 1);
    let stored = storage
      .get("site-v2-static", "https://example.com/styles.css")
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"body {}");
  }

  #[tokio::test]
  async fn test_network_first_leaves_copy_in_target_store() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    fetcher.serve("https://example.com/", 200, "home");

    let served = manager.handle_request(&document("https://example.com/")).await;

    assert_eq!(served.source, ServedSource::Network);
    assert_eq!(served.status, 200);
    let stored = storage
      .get("site-v2-static", "https://example.com/")
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"home");
  }

  #[tokio::test]
  async fn test_network_first_does_not_cache_non_ok() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    fetcher.serve("https://example.com/gone", 404, "not here");

    let request = StashRequest {
      url: "https://example.com/gone".to_string(),
      destination: Destination::Other,
    };
    let served = manager.handle_request(&request).await;

    assert_eq!(served.status, 404);
    assert_eq!(served.source, ServedSource::Network);
    assert!(storage
      .get("site-v2-dynamic", "https://example.com/gone")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    let entry = CachedResponse::new(
      "https://example.com/api/data.json",
      200,
      Vec::new(),
      b"{}".to_vec(),
    );
    storage.put("site-v2-dynamic", &entry).unwrap();
    fetcher.set_offline(true);

    let request = StashRequest {
      url: "https://example.com/api/data.json".to_string(),
      destination: Destination::Other,
    };
    let served = manager.handle_request(&request).await;

    assert_eq!(served.source, ServedSource::Cache);
    assert_eq!(served.body, b"{}");
  }

  #[tokio::test]
  async fn test_offline_navigation_serves_offline_page() {
    let (manager, _storage, fetcher) = manager_with_core(&["/offline.html"]);
    fetcher.serve("https://example.com/offline.html", 200, "you are offline");
    manager.install().await.unwrap();
    fetcher.set_offline(true);

    let served = manager.handle_request(&document("https://example.com/")).await;

    assert_eq!(served.source, ServedSource::OfflinePage);
    assert_eq!(served.body, b"you are offline");
  }

  #[tokio::test]
  async fn test_offline_non_navigation_synthesizes_503() {
    let (manager, _storage, fetcher) = manager_with_core(&[]);
    fetcher.set_offline(true);

    let request = StashRequest {
      url: "https://example.com/api/data.json".to_string(),
      destination: Destination::Other,
    };
    let served = manager.handle_request(&request).await;

    assert_eq!(served.status, 503);
    assert_eq!(served.source, ServedSource::Unavailable);
    assert_eq!(served.body, b"Offline content not available");
    assert!(served
      .headers
      .iter()
      .any(|(name, value)| name == "content-type" && value == "text/plain"));
  }

  #[tokio::test]
  async fn test_cache_first_total_failure_synthesizes_503() {
    let (manager, _storage, fetcher) = manager_with_core(&[]);
    fetcher.set_offline(true);

    let served = manager.handle_request(&style("https://example.com/styles.css")).await;

    assert_eq!(served.status, 503);
    assert_eq!(served.source, ServedSource::Unavailable);
  }

  #[tokio::test]
  async fn test_runtime_fetch_populates_runtime_store_once() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    fetcher.serve("https://example.com/widget", 200, "widget");

    let first = manager.runtime_fetch("https://example.com/widget").await;
    assert_eq!(first.source, ServedSource::Network);
    assert!(storage
      .get("site-v2-runtime", "https://example.com/widget")
      .unwrap()
      .is_some());

    fetcher.set_offline(true);
    let second = manager.runtime_fetch("https://example.com/widget").await;
    assert_eq!(second.source, ServedSource::Cache);
    assert_eq!(second.body, b"widget");
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_cache_urls_isolates_failures() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    fetcher.serve("https://example.com/a.json", 200, "a");
    // /b.json not served

    let cached = manager
      .cache_urls(&["/a.json".to_string(), "/b.json".to_string()])
      .await;

    assert_eq!(cached, 1);
    assert_eq!(
      storage.urls("site-v2-dynamic").unwrap(),
      vec!["https://example.com/a.json"]
    );
  }

  #[tokio::test]
  async fn test_warm_static_assets_fills_static_store() {
    let (manager, storage, fetcher) = manager_with_core(&[]);
    fetcher.serve("https://example.com/icons/icon-192x192.png", 200, "png");

    let cached = manager.warm_static_assets().await;

    assert_eq!(cached, 1);
    assert!(storage
      .get("site-v2-static", "https://example.com/icons/icon-192x192.png")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_refresh_core_publishes_notice() {
    let (manager, _storage, fetcher) = manager_with_core(&["/"]);
    fetcher.serve("https://example.com/", 200, "home");
    let mut rx = manager.notices().subscribe();

    let refreshed = manager.refresh_core().await;
    assert_eq!(refreshed, 1);

    match rx.recv().await.unwrap() {
      Notice::CacheUpdated { refreshed } => assert_eq!(refreshed, 1),
      other => panic!("unexpected notice: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_cache_info_counts_match_keys() {
    let (manager, storage, _fetcher) = manager_with_core(&[]);
    let a = CachedResponse::new("https://example.com/a", 200, Vec::new(), b"a".to_vec());
    let b = CachedResponse::new("https://example.com/b", 200, Vec::new(), b"b".to_vec());
    storage.put("site-v2-static", &a).unwrap();
    storage.put("site-v2-static", &b).unwrap();
    storage.put("site-v2-dynamic", &a).unwrap();
    storage.open_store("site-v2-runtime").unwrap();

    let info = manager.cache_info().unwrap();

    assert_eq!(info.len(), 3);
    for store in &info {
      assert_eq!(store.size, store.urls.len());
    }
    assert_eq!(info[0].name, "site-v2-static");
    assert_eq!(info[0].size, 2);
    assert_eq!(info[2].name, "site-v2-runtime");
    assert_eq!(info[2].size, 0);
  }

  #[tokio::test]
  async fn test_delete_cache_reports_existence() {
    let (manager, storage, _fetcher) = manager_with_core(&[]);
    storage.open_store("site-v2-dynamic").unwrap();

    assert!(manager.delete_cache("site-v2-dynamic").unwrap());
    assert!(!manager.delete_cache("site-v2-dynamic").unwrap());
  }

  #[tokio::test]
  async fn test_background_sync_notifies_subscribers() {
    let (manager, _storage, _fetcher) = manager_with_core(&[]);
    let mut rx = manager.notices().subscribe();

    manager.background_sync().await;

    match rx.recv().await.unwrap() {
      Notice::BackgroundSync { message } => assert_eq!(message, "Background sync completed"),
      other => panic!("unexpected notice: {:?}", other),
    }
  }
}
