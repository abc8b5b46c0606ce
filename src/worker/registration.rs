//! Host side of the worker: which version controls pages, which one waits.

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cache::{ClientId, PartitionStore, Request, Served};
use crate::net::Network;

use super::manager::{ActivationReport, CacheManager, InstallReport, WorkerSettings};

/// Sent to every open page when a new worker takes control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerChange {
  pub version: String,
}

/// Result of handing a build to the registration.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
  /// The version is already active or waiting
  Unchanged,
  /// Installed and took control immediately
  Activated {
    install: InstallReport,
    activation: ActivationReport,
  },
  /// Installed; waits for skip-wait or for the old version's pages to close
  Waiting { install: InstallReport },
}

struct Workers<S: PartitionStore, N: Network> {
  active: Option<Arc<CacheManager<S, N>>>,
  waiting: Option<Arc<CacheManager<S, N>>>,
  clients: HashSet<ClientId>,
}

/// Registration of the offline worker for one origin.
pub struct Registration<S: PartitionStore, N: Network> {
  settings: Arc<WorkerSettings>,
  storage: Arc<S>,
  network: Arc<N>,
  workers: Mutex<Workers<S, N>>,
  controller_tx: broadcast::Sender<ControllerChange>,
}

impl<S: PartitionStore, N: Network> Registration<S, N> {
  pub fn new(settings: WorkerSettings, storage: Arc<S>, network: Arc<N>) -> Self {
    let (controller_tx, _) = broadcast::channel(16);
    Self {
      settings: Arc::new(settings),
      storage,
      network,
      workers: Mutex::new(Workers {
        active: None,
        waiting: None,
        clients: HashSet::new(),
      }),
      controller_tx,
    }
  }

  fn workers(&self) -> MutexGuard<'_, Workers<S, N>> {
    self.workers.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Listen for controller changes (the page side of the claim handshake).
  pub fn subscribe(&self) -> broadcast::Receiver<ControllerChange> {
    self.controller_tx.subscribe()
  }

  /// Worker currently controlling pages.
  pub fn controller(&self) -> Option<Arc<CacheManager<S, N>>> {
    self.workers().active.clone()
  }

  /// A new build was detected: install it and activate when allowed.
  pub async fn update(&self, version: &str) -> Result<UpdateOutcome> {
    {
      let workers = self.workers();
      let known = workers
        .active
        .iter()
        .chain(workers.waiting.iter())
        .any(|w| w.version() == version);
      if known {
        debug!(version, "Worker version already registered");
        return Ok(UpdateOutcome::Unchanged);
      }
    }

    let worker = Arc::new(CacheManager::new(
      version,
      Arc::clone(&self.settings),
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
    ));
    let install = worker.install().await?;

    let mut workers = self.workers();
    if let Some(previous) = workers.waiting.take() {
      info!(version = previous.version(), "Waiting worker replaced");
      previous.supersede();
    }

    if workers.active.is_none() || workers.clients.is_empty() {
      let activation = self.promote(&mut workers, worker)?;
      Ok(UpdateOutcome::Activated {
        install,
        activation,
      })
    } else {
      info!(
        version,
        clients = workers.clients.len(),
        "Worker installed, waiting for open pages to close"
      );
      workers.waiting = Some(worker);
      Ok(UpdateOutcome::Waiting { install })
    }
  }

  /// Re-attach to `version` if an earlier run already installed it.
  /// Returns `None` when its partition is gone and a full update is needed.
  pub fn resume(&self, version: &str) -> Result<Option<ActivationReport>> {
    let partition = self.settings.partition_for(version);
    if !self.storage.partition_names()?.contains(&partition) {
      return Ok(None);
    }

    let worker = Arc::new(CacheManager::resume(
      version,
      Arc::clone(&self.settings),
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
    ));
    let mut workers = self.workers();
    self.promote(&mut workers, worker).map(Some)
  }

  /// Activate the waiting worker now instead of waiting for pages to close.
  pub fn skip_waiting(&self) -> Result<Option<ActivationReport>> {
    let mut workers = self.workers();
    match workers.waiting.take() {
      Some(worker) => self.promote(&mut workers, worker).map(Some),
      None => Ok(None),
    }
  }

  /// Activate `worker`, retire the previous controller and claim all pages.
  fn promote(
    &self,
    workers: &mut Workers<S, N>,
    worker: Arc<CacheManager<S, N>>,
  ) -> Result<ActivationReport> {
    let report = worker.activate()?;
    let version = worker.version().to_string();

    if let Some(previous) = workers.active.replace(worker) {
      previous.supersede();
    }

    // No receivers is fine: no page is listening yet
    let _ = self.controller_tx.send(ControllerChange {
      version: version.clone(),
    });
    info!(version = %version, clients = workers.clients.len(), "Claimed open pages");

    Ok(report)
  }

  pub fn client_loaded(&self, client: ClientId) {
    self.workers().clients.insert(client);
  }

  /// A page went away. Its background refreshes are dropped, and once no page
  /// is left the waiting worker (if any) takes over.
  pub fn client_unloaded(&self, client: ClientId) -> Result<Option<ActivationReport>> {
    let mut workers = self.workers();
    workers.clients.remove(&client);

    if let Some(active) = &workers.active {
      let cancelled = active.cancel_refreshes(client);
      if cancelled > 0 {
        debug!(client, cancelled, "Cancelled background refreshes");
      }
    }

    if workers.clients.is_empty() {
      if let Some(worker) = workers.waiting.take() {
        return self.promote(&mut workers, worker).map(Some);
      }
    }
    Ok(None)
  }

  /// Route a page request through the controlling worker, or straight to the
  /// network when nothing is active yet.
  pub async fn handle_fetch(&self, request: Request) -> Result<Served> {
    match self.controller() {
      Some(worker) => worker.handle_fetch(request).await,
      None => {
        let response = self.network.fetch(&request).await?;
        Ok(Served::from_network(response))
      }
    }
  }

  /// Delete every partition. Returns how many were removed.
  pub fn clear_caches(&self) -> Result<usize> {
    let removed = self.storage.clear()?;
    info!(removed, "Cleared all cache partitions");
    Ok(removed)
  }

  /// Partition names with their entry counts.
  pub fn partitions(&self) -> Result<Vec<(String, usize)>> {
    self
      .storage
      .partition_names()?
      .into_iter()
      .map(|name| {
        let count = self.storage.entry_count(&name)?;
        Ok((name, count))
      })
      .collect()
  }
}
