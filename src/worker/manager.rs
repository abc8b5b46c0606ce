//! A single worker instance: one deployed version and its cache partition.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{
  CachedResponse, ClientId, PartitionStore, Request, RequestKey, Response, Served,
};
use crate::config::CacheConfig;
use crate::net::Network;

use super::lifecycle::WorkerState;
use super::routing::{self, Route};

/// Origin and cache policy shared by every worker instance.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub origin: Url,
  pub cache: CacheConfig,
}

impl WorkerSettings {
  pub fn new(origin: Url, cache: CacheConfig) -> Self {
    Self { origin, cache }
  }

  /// Partition name for a worker version.
  pub fn partition_for(&self, version: &str) -> String {
    format!("{}-{}", self.cache.prefix, version)
  }
}

/// Outcome of pre-caching the manifest.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub partition: String,
  /// Number of entries stored (manifest plus offline document)
  pub cached: usize,
  /// Paths that could not be fetched or stored
  pub failed: Vec<String>,
}

/// Outcome of activating a worker.
#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  pub version: String,
  pub retained: Vec<String>,
  pub deleted: Vec<String>,
}

/// Worker for one deployed version.
///
/// Owns the `{prefix}-{version}` partition, shares the offline partition
/// with every other version, and intercepts fetches once active.
pub struct CacheManager<S: PartitionStore, N: Network> {
  version: String,
  partition: String,
  settings: Arc<WorkerSettings>,
  storage: Arc<S>,
  network: Arc<N>,
  state: Mutex<WorkerState>,
  /// Background revalidations per page, aborted when the page unloads
  refreshes: Mutex<HashMap<ClientId, Vec<AbortHandle>>>,
}

impl<S: PartitionStore, N: Network> CacheManager<S, N> {
  pub fn new(
    version: &str,
    settings: Arc<WorkerSettings>,
    storage: Arc<S>,
    network: Arc<N>,
  ) -> Self {
    Self::with_state(version, settings, storage, network, WorkerState::Installing)
  }

  /// Worker for a version whose partition survived from an earlier run.
  /// Starts out installed, so it can be activated without re-fetching.
  pub fn resume(
    version: &str,
    settings: Arc<WorkerSettings>,
    storage: Arc<S>,
    network: Arc<N>,
  ) -> Self {
    Self::with_state(version, settings, storage, network, WorkerState::Installed)
  }

  fn with_state(
    version: &str,
    settings: Arc<WorkerSettings>,
    storage: Arc<S>,
    network: Arc<N>,
    state: WorkerState,
  ) -> Self {
    Self {
      version: version.to_string(),
      partition: settings.partition_for(version),
      settings,
      storage,
      network,
      state: Mutex::new(state),
      refreshes: Mutex::new(HashMap::new()),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn partition(&self) -> &str {
    &self.partition
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn transition(&self, next: WorkerState) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    *state = state.advance(next)?;
    Ok(())
  }

  /// Open the partitions and warm them from the manifest.
  ///
  /// Every asset is fetched independently; failures are recorded in the
  /// report and never fail the install.
  pub async fn install(&self) -> Result<InstallReport> {
    if self.state() != WorkerState::Installing {
      return Err(eyre!(
        "Worker {} cannot install from state {}",
        self.version,
        self.state()
      ));
    }

    info!(version = %self.version, partition = %self.partition, "Installing worker");

    let offline_partition = self.settings.cache.offline_partition.as_str();
    for name in [self.partition.as_str(), offline_partition] {
      if let Err(e) = self.storage.create_partition(name) {
        warn!(partition = name, "Failed to create partition: {}", e);
      }
    }

    let manifest = self
      .settings
      .cache
      .manifest
      .iter()
      .map(|path| self.precache(self.partition.as_str(), path));
    let offline = self.precache(offline_partition, &self.settings.cache.offline_path);

    let (manifest_results, offline_result) =
      futures::future::join(futures::future::join_all(manifest), offline).await;

    let mut report = InstallReport {
      partition: self.partition.clone(),
      ..Default::default()
    };
    for (path, stored) in self
      .settings
      .cache
      .manifest
      .iter()
      .zip(manifest_results)
      .chain(std::iter::once((&self.settings.cache.offline_path, offline_result)))
    {
      if stored {
        report.cached += 1;
      } else {
        report.failed.push(path.clone());
      }
    }

    self.transition(WorkerState::Installed)?;
    info!(
      version = %self.version,
      cached = report.cached,
      failed = report.failed.len(),
      "Worker installed"
    );

    Ok(report)
  }

  /// Fetch one path and store it. Returns whether it ended up cached.
  async fn precache(&self, partition: &str, path: &str) -> bool {
    let url = match self.settings.origin.join(path) {
      Ok(url) => url,
      Err(e) => {
        warn!(path, "Skipping invalid manifest entry: {}", e);
        return false;
      }
    };

    let request = Request::get(url);
    match self.network.fetch(&request).await {
      Ok(response) if response.is_success() => {
        store_best_effort(self.storage.as_ref(), partition, &request.key(), &response)
      }
      Ok(response) => {
        debug!(path, status = response.status, "Manifest entry not cacheable");
        false
      }
      Err(e) => {
        debug!(path, "Manifest fetch failed: {}", e);
        false
      }
    }
  }

  /// Delete every partition except this version's and the offline one.
  pub fn activate(&self) -> Result<ActivationReport> {
    self.transition(WorkerState::Active)?;

    let keep = [
      self.partition.as_str(),
      self.settings.cache.offline_partition.as_str(),
    ];
    let mut report = ActivationReport {
      version: self.version.clone(),
      ..Default::default()
    };

    let names = match self.storage.partition_names() {
      Ok(names) => names,
      Err(e) => {
        warn!("Failed to enumerate partitions during activation: {}", e);
        Vec::new()
      }
    };

    for name in names {
      if keep.contains(&name.as_str()) {
        report.retained.push(name);
        continue;
      }
      match self.storage.delete_partition(&name) {
        Ok(_) => report.deleted.push(name),
        Err(e) => warn!(partition = %name, "Failed to delete stale partition: {}", e),
      }
    }

    info!(
      version = %self.version,
      deleted = ?report.deleted,
      "Worker activated"
    );

    Ok(report)
  }

  /// Mark this worker as replaced by a newer version.
  pub fn supersede(&self) {
    if let Err(e) = self.transition(WorkerState::Superseded) {
      debug!(version = %self.version, "{}", e);
    }
    let mut refreshes = self.refreshes.lock().unwrap_or_else(|e| e.into_inner());
    for handle in refreshes.drain().flat_map(|(_, handles)| handles) {
      handle.abort();
    }
  }

  /// Intercept a request.
  ///
  /// Only bypassed requests can fail: for intercepted ones a network error
  /// selects a fallback tier instead.
  pub async fn handle_fetch(&self, request: Request) -> Result<Served> {
    if !self.state().can_intercept_fetch() {
      return self.passthrough(&request).await;
    }

    match routing::classify(
      &request,
      &self.settings.origin,
      &self.settings.cache.never_cache,
    ) {
      Route::Bypass(reason) => {
        debug!(url = %request.url, ?reason, "Bypassing cache");
        self.passthrough(&request).await
      }
      Route::Navigation => Ok(self.network_first(request).await),
      Route::Asset => Ok(self.cache_first(request).await),
    }
  }

  async fn passthrough(&self, request: &Request) -> Result<Served> {
    let response = self.network.fetch(request).await?;
    Ok(Served::from_network(response))
  }

  /// Network-first for document navigations.
  ///
  /// 1. Try the network; on success store a copy in the background
  /// 2. On failure, serve the cached page from this version's partition
  /// 3. Else the offline document (as 503)
  /// 4. Else a synthesized offline page (503)
  async fn network_first(&self, request: Request) -> Served {
    let key = request.key();

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_success() {
          let storage = Arc::clone(&self.storage);
          let partition = self.partition.clone();
          let copy = response.clone();
          tokio::spawn(async move {
            store_best_effort(storage.as_ref(), &partition, &key, &copy);
          });
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, "Navigation fetch failed, using fallback: {}", e);

        if let Some(cached) = self.lookup(&self.partition, &key) {
          return Served::from_cache(cached);
        }

        let offline_url = match self.settings.origin.join(&self.settings.cache.offline_path) {
          Ok(url) => Some(url),
          Err(e) => {
            warn!("Invalid offline path: {}", e);
            None
          }
        };
        if let Some(url) = offline_url {
          let offline_key = Request::get(url).key();
          if let Some(cached) = self.lookup(&self.settings.cache.offline_partition, &offline_key)
          {
            return Served::offline_fallback(cached);
          }
        }

        Served::synthesized(Response::offline_document())
      }
    }
  }

  /// Cache-first with background revalidation for static assets.
  async fn cache_first(&self, request: Request) -> Served {
    let key = request.key();

    if let Some(cached) = self.lookup(&self.partition, &key) {
      self.spawn_refresh(request);
      return Served::from_cache(cached);
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.status == 200 {
          store_best_effort(self.storage.as_ref(), &self.partition, &key, &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, "Asset fetch failed with no cached copy: {}", e);
        Served::synthesized(Response::service_unavailable())
      }
    }
  }

  /// Refresh a cached asset without holding up the response.
  fn spawn_refresh(&self, request: Request) {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let partition = self.partition.clone();
    let client = request.client;

    let handle = tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) if response.status == 200 => {
          store_best_effort(storage.as_ref(), &partition, &request.key(), &response);
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Revalidation not stored")
        }
        Err(e) => debug!(url = %request.url, "Revalidation failed: {}", e),
      }
    });

    if let Some(client) = client {
      let mut refreshes = self.refreshes.lock().unwrap_or_else(|e| e.into_inner());
      let handles = refreshes.entry(client).or_default();
      handles.retain(|h| !h.is_finished());
      handles.push(handle.abort_handle());
    }
  }

  /// Abort pending background refreshes started for a page that went away.
  /// Returns how many were still running.
  pub fn cancel_refreshes(&self, client: ClientId) -> usize {
    let handles = self
      .refreshes
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&client)
      .unwrap_or_default();

    let mut cancelled = 0;
    for handle in handles {
      if !handle.is_finished() {
        handle.abort();
        cancelled += 1;
      }
    }
    cancelled
  }

  fn lookup(&self, partition: &str, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.lookup(partition, key) {
      Ok(found) => found,
      Err(e) => {
        warn!(partition, %key, "Cache read failed: {}", e);
        None
      }
    }
  }
}

/// Store a response, logging and swallowing any failure.
fn store_best_effort<S: PartitionStore>(
  storage: &S,
  partition: &str,
  key: &RequestKey,
  response: &Response,
) -> bool {
  match storage.put(partition, key, response) {
    Ok(()) => true,
    Err(e) => {
      warn!(partition, %key, "Cache write failed: {}", e);
      false
    }
  }
}
