//! Page-side deployment version monitor.
//!
//! Polls the origin's version endpoint on an interval and when the tab
//! regains focus or visibility, compares the answer with the version baked
//! into the page, and decides between a banner and a reload. Reloading
//! purges the worker's caches first so the new deployment is actually
//! fetched.

mod activity;
mod banner;
mod decision;
mod session;
mod throttle;

pub use activity::{ActivityTracker, UnsavedChanges};
pub use banner::{Banner, BannerAction, PageHost};
pub use decision::{decide, Decision, Snapshot};
pub use session::{SessionState, SessionStore};
pub use throttle::Throttle;

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::Request;
use crate::config::{Config, MonitorConfig};
use crate::net::Network;
use crate::worker::WorkerHandle;

/// What caused a version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  Interval,
  Focus,
  Visible,
  Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
  /// Inside the minimum interval of the previous check
  Throttled,
  /// Endpoint unreachable, non-200 or malformed
  Inconclusive,
  UpToDate,
  /// Server version is the one dismissed earlier in this session
  Dismissed { version: String },
  UpdateAvailable { version: String, decision: Decision },
}

/// Result of inspecting the session on page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
  /// No dismissed update on record
  Clean,
  /// The dismissed update has been picked up by this load
  PendingCleared,
  /// A dismissed update is still newer than this page
  Reshow { version: String },
}

/// Events from the page the monitor runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
  Focus,
  Visibility { visible: bool },
  /// Keyboard, pointer or scroll input
  Interaction,
  Banner(BannerAction),
  /// The worker claimed this page with a new version
  ControllerChanged { version: String },
}

/// Why the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
  Reloaded { bypass_cache: bool },
  /// The page event channel closed
  Closed,
}

#[derive(Deserialize)]
struct VersionPayload {
  version: String,
}

pub struct VersionMonitor<N: Network, H: PageHost, T: SessionStore> {
  local_version: String,
  version_url: Url,
  config: MonitorConfig,
  network: Arc<N>,
  host: H,
  sessions: Arc<T>,
  session_id: String,
  worker: WorkerHandle,
  unsaved: UnsavedChanges,
  activity: ActivityTracker,
  throttle: Throttle,
  state: SessionState,
  /// Banner currently on screen
  shown: Option<Banner>,
  auto_reload_at: Option<Instant>,
}

impl<N: Network, H: PageHost, T: SessionStore> VersionMonitor<N, H, T> {
  pub fn new(
    config: &Config,
    network: Arc<N>,
    host: H,
    sessions: Arc<T>,
    session_id: &str,
    worker: WorkerHandle,
  ) -> Result<Self> {
    let version_url = config
      .origin
      .join(&config.monitor.version_path)
      .map_err(|e| eyre!("Invalid version path {}: {}", config.monitor.version_path, e))?;

    Ok(Self {
      local_version: config.version.clone(),
      version_url,
      config: config.monitor.clone(),
      network,
      host,
      sessions,
      session_id: session_id.to_string(),
      worker,
      unsaved: UnsavedChanges::new(),
      activity: ActivityTracker::new(config.monitor.idle_threshold()),
      throttle: Throttle::new(config.monitor.min_check_interval()),
      state: SessionState::default(),
      shown: None,
      auto_reload_at: None,
    })
  }

  /// Handle for form collaborators to report unsaved changes.
  pub fn unsaved_changes(&self) -> UnsavedChanges {
    self.unsaved.clone()
  }

  pub fn shown_banner(&self) -> Option<&Banner> {
    self.shown.as_ref()
  }

  pub fn auto_reload_pending(&self) -> bool {
    self.auto_reload_at.is_some()
  }

  fn snapshot(&self) -> Snapshot {
    Snapshot {
      unsaved_changes: self.unsaved.get(),
      idle: self.activity.is_idle(),
      auto_reload: self.config.auto_reload,
    }
  }

  fn persist(&self) {
    if let Err(e) = self.sessions.save(&self.session_id, &self.state) {
      warn!(session = %self.session_id, "Failed to save version state: {}", e);
    }
  }

  /// Restore the session state for a freshly loaded page.
  pub fn on_load(&mut self) -> LoadOutcome {
    self.state = match self.sessions.load(&self.session_id) {
      Ok(state) => state,
      Err(e) => {
        warn!(session = %self.session_id, "Failed to load version state: {}", e);
        SessionState::default()
      }
    };
    self.state.local_version = Some(self.local_version.clone());

    if let Some(last) = self.state.last_check_at {
      // A check made by an earlier load of this session still counts
      let elapsed = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
      if let Some(at) = Instant::now().checked_sub(elapsed) {
        self.throttle.mark(at);
      }
    }

    let outcome = match self.state.pending_version.clone() {
      Some(pending) if pending != self.local_version => {
        info!(pending = %pending, local = %self.local_version, "Dismissed update still pending");
        LoadOutcome::Reshow { version: pending }
      }
      Some(_) => {
        self.state.pending_version = None;
        LoadOutcome::PendingCleared
      }
      None => LoadOutcome::Clean,
    };

    self.persist();
    outcome
  }

  /// Ask the origin for its version and act on a mismatch.
  pub async fn check(&mut self, trigger: Trigger) -> CheckOutcome {
    if !self.throttle.try_acquire() {
      debug!(?trigger, "Version check throttled");
      return CheckOutcome::Throttled;
    }

    let server_version = match self.server_version().await {
      Ok(version) => version,
      Err(e) => {
        debug!(?trigger, "Version check inconclusive: {}", e);
        return CheckOutcome::Inconclusive;
      }
    };

    self.state.last_check_at = Some(Utc::now());

    if server_version == self.local_version {
      debug!(version = %server_version, "Page is up to date");
      self.state.pending_version = None;
      self.persist();
      return CheckOutcome::UpToDate;
    }

    if self.state.pending_version.as_deref() == Some(server_version.as_str()) {
      debug!(version = %server_version, "Update already dismissed in this session");
      self.persist();
      return CheckOutcome::Dismissed {
        version: server_version,
      };
    }

    self.persist();
    info!(
      local = %self.local_version,
      server = %server_version,
      ?trigger,
      "New version deployed"
    );
    let decision = self.handle_update(&server_version);
    CheckOutcome::UpdateAvailable {
      version: server_version,
      decision,
    }
  }

  async fn server_version(&self) -> Result<String> {
    let request = Request::get(self.version_url.clone())
      .with_header("accept", "application/json")
      .with_header("cache-control", "no-store");

    let response = self.network.fetch(&request).await?;
    if response.status != 200 {
      return Err(eyre!("Version endpoint returned {}", response.status));
    }

    let payload: VersionPayload = serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Malformed version payload: {}", e))?;
    if payload.version.trim().is_empty() {
      return Err(eyre!("Empty version in payload"));
    }

    Ok(payload.version)
  }

  /// Run the decision procedure for `version` and apply it.
  fn handle_update(&mut self, version: &str) -> Decision {
    let decision = decide(self.snapshot());
    info!(version, ?decision, "Update decision");

    match decision {
      Decision::WarnUnsaved => self.show(Banner::unsaved_work(version)),
      Decision::OfferReload | Decision::Notify => self.show(Banner::update_available(version)),
      Decision::AutoReload => self.show(Banner::reloading(version)),
    }
    if decision.reloads_automatically() {
      self.auto_reload_at = Some(Instant::now() + self.config.auto_reload_delay());
    }

    decision
  }

  /// Show a dismissed update again, without auto-reloading.
  pub fn reshow(&mut self, version: &str) {
    if self.unsaved.get() {
      self.show(Banner::unsaved_work(version));
    } else {
      self.show(Banner::update_available(version));
    }
  }

  fn show(&mut self, banner: Banner) {
    if self.shown.as_ref() == Some(&banner) {
      return;
    }
    self.host.show_banner(&banner);
    self.shown = Some(banner);
  }

  /// The user chose "later" or closed the banner.
  pub fn dismiss(&mut self) {
    self.auto_reload_at = None;
    if let Some(banner) = self.shown.take() {
      info!(version = %banner.version, "Update dismissed for this session");
      self.host.hide_banner();
      self.state.pending_version = Some(banner.version);
      self.persist();
    }
  }

  /// Purge every cache partition, then reload bypassing cached documents.
  pub async fn reload(&mut self) -> Exit {
    self.auto_reload_at = None;

    match tokio::time::timeout(self.config.clear_ack_timeout(), self.worker.clear_caches()).await {
      Ok(Ok(ack)) if ack.success => info!(removed = ack.removed, "Caches cleared before reload"),
      Ok(Ok(_)) => warn!("Worker failed to clear caches, reloading anyway"),
      Ok(Err(e)) => warn!("Could not reach worker to clear caches: {}", e),
      Err(_) => warn!("Timed out waiting for cache clear acknowledgement"),
    }

    self.host.reload(true);
    Exit::Reloaded { bypass_cache: true }
  }

  /// The auto-reload delay elapsed. The user may have come back or started
  /// editing since, so the decision is taken again.
  pub async fn fire_auto_reload(&mut self) -> Option<Exit> {
    self.auto_reload_at = None;
    let version = self.shown.as_ref().map(|b| b.version.clone())?;

    match decide(self.snapshot()) {
      Decision::AutoReload => Some(self.reload().await),
      Decision::WarnUnsaved => {
        self.show(Banner::unsaved_work(&version));
        None
      }
      Decision::OfferReload | Decision::Notify => {
        self.show(Banner::update_available(&version));
        None
      }
    }
  }

  async fn handle_event(
    &mut self,
    event: PageEvent,
    settle_at: &mut Option<(Instant, Trigger)>,
  ) -> Option<Exit> {
    match event {
      PageEvent::Focus => {
        *settle_at = Some((Instant::now() + self.config.settle_delay(), Trigger::Focus));
      }
      PageEvent::Visibility { visible: true } => {
        *settle_at = Some((Instant::now() + self.config.settle_delay(), Trigger::Visible));
      }
      PageEvent::Visibility { visible: false } => {}
      PageEvent::Interaction => self.activity.record(),
      PageEvent::Banner(BannerAction::Reload) => return Some(self.reload().await),
      PageEvent::Banner(BannerAction::Dismiss) => self.dismiss(),
      PageEvent::ControllerChanged { version } => {
        if version == self.local_version {
          return None;
        }
        if self.unsaved.get() {
          self.show(Banner::unsaved_work(&version));
        } else {
          info!(version = %version, "Worker changed, reloading");
          self.host.reload(false);
          return Some(Exit::Reloaded {
            bypass_cache: false,
          });
        }
      }
    }
    None
  }

  /// Drive the monitor until the page reloads or the event channel closes.
  pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<PageEvent>) -> Exit {
    let mut reshow_at = match self.on_load() {
      LoadOutcome::Reshow { version } => {
        Some((Instant::now() + self.config.reshow_delay(), version))
      }
      _ => None,
    };
    let mut settle_at: Option<(Instant, Trigger)> = None;

    let poll = self.config.poll_interval();
    let mut interval = tokio::time::interval_at(Instant::now() + poll, poll);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = interval.tick() => {
          self.check(Trigger::Interval).await;
        }
        _ = sleep_until(settle_at.as_ref().map(|(at, _)| *at)) => {
          if let Some((_, trigger)) = settle_at.take() {
            self.check(trigger).await;
          }
        }
        _ = sleep_until(reshow_at.as_ref().map(|(at, _)| *at)) => {
          if let Some((_, version)) = reshow_at.take() {
            self.reshow(&version);
          }
        }
        _ = sleep_until(self.auto_reload_at) => {
          if let Some(exit) = self.fire_auto_reload().await {
            return exit;
          }
        }
        event = events.recv() => match event {
          Some(event) => {
            if let Some(exit) = self.handle_event(event, &mut settle_at).await {
              return exit;
            }
          }
          None => return Exit::Closed,
        },
      }
    }
  }
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Response, SqliteStorage};
  use crate::testing::{MockNetwork, RecordingHost, ORIGIN};
  use crate::worker::channel::{ClearAck, Command};
  use std::time::Duration;

  type TestMonitor = VersionMonitor<MockNetwork, RecordingHost, SqliteStorage>;

  fn config(auto_reload: bool) -> Config {
    let mut config = Config::from_yaml(&format!("origin: {ORIGIN}\nversion: v1\n")).unwrap();
    config.monitor.auto_reload = auto_reload;
    config
  }

  fn serve_version(network: &MockNetwork, version: &str) {
    network.route(
      "/api/version",
      Response::new(200, format!(r#"{{"version":"{}"}}"#, version)),
    );
  }

  fn monitor(
    config: &Config,
    network: &MockNetwork,
    sessions: &Arc<SqliteStorage>,
    host: &RecordingHost,
  ) -> (TestMonitor, mpsc::UnboundedReceiver<Command>) {
    let (worker, rx) = WorkerHandle::channel();
    let monitor = VersionMonitor::new(
      config,
      Arc::new(network.clone()),
      host.clone(),
      Arc::clone(sessions),
      "tab-1",
      worker,
    )
    .unwrap();
    (monitor, rx)
  }

  /// Answer clear-cache commands like a healthy worker would.
  fn ack_clears(mut rx: mpsc::UnboundedReceiver<Command>) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
      let mut cleared = 0;
      while let Some(command) = rx.recv().await {
        if let Command::ClearCaches { reply } = command {
          cleared += 1;
          let _ = reply.send(ClearAck {
            success: true,
            removed: 2,
          });
        }
      }
      cleared
    })
  }

  #[tokio::test]
  async fn test_matching_version_is_up_to_date() {
    let network = MockNetwork::new();
    serve_version(&network, "v1");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut monitor, _rx) = monitor(&config(false), &network, &sessions, &host);

    assert_eq!(monitor.check(Trigger::Manual).await, CheckOutcome::UpToDate);
    assert!(host.banners().is_empty());
    assert!(sessions.load("tab-1").unwrap().last_check_at.is_some());
  }

  #[tokio::test]
  async fn test_throttle_allows_one_request_per_window() {
    let network = MockNetwork::new();
    serve_version(&network, "v2");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut monitor, _rx) = monitor(&config(false), &network, &sessions, &host);

    let first = monitor.check(Trigger::Focus).await;
    let second = monitor.check(Trigger::Visible).await;

    assert!(matches!(first, CheckOutcome::UpdateAvailable { .. }));
    assert_eq!(second, CheckOutcome::Throttled);
    assert_eq!(network.calls_to("/api/version"), 1);
    assert_eq!(host.banners().len(), 1);
  }

  #[tokio::test]
  async fn test_inconclusive_responses_are_skipped() {
    let network = MockNetwork::new();
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let mut config = config(false);
    config.monitor.min_check_interval_secs = 0;
    let (mut monitor, _rx) = monitor(&config, &network, &sessions, &host);

    network.route("/api/version", Response::new(503, "down"));
    assert_eq!(monitor.check(Trigger::Manual).await, CheckOutcome::Inconclusive);

    network.route("/api/version", Response::new(200, r#"{"build":"v2"}"#));
    assert_eq!(monitor.check(Trigger::Manual).await, CheckOutcome::Inconclusive);

    network.set_offline(true);
    assert_eq!(monitor.check(Trigger::Manual).await, CheckOutcome::Inconclusive);

    assert!(host.banners().is_empty());
    assert_eq!(network.calls_to("/api/version"), 3);
  }

  #[tokio::test]
  async fn test_unsaved_changes_warn_instead_of_reload() {
    let network = MockNetwork::new();
    serve_version(&network, "v2");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let mut config = config(true);
    config.monitor.idle_threshold_secs = 0;
    let (mut monitor, _rx) = monitor(&config, &network, &sessions, &host);
    monitor.unsaved_changes().set(true);

    let outcome = monitor.check(Trigger::Manual).await;

    assert_eq!(
      outcome,
      CheckOutcome::UpdateAvailable {
        version: "v2".to_string(),
        decision: Decision::WarnUnsaved
      }
    );
    assert_eq!(host.banners(), vec![Banner::unsaved_work("v2")]);
    assert!(!monitor.auto_reload_pending());
  }

  #[tokio::test(start_paused = true)]
  async fn test_idle_clean_session_auto_reloads() {
    let network = MockNetwork::new();
    serve_version(&network, "v2");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut monitor, rx) = monitor(&config(true), &network, &sessions, &host);
    let worker = ack_clears(rx);

    tokio::time::advance(Duration::from_secs(10 * 60)).await;
    let outcome = monitor.check(Trigger::Interval).await;

    assert!(matches!(
      outcome,
      CheckOutcome::UpdateAvailable {
        decision: Decision::AutoReload,
        ..
      }
    ));
    assert!(monitor.auto_reload_pending());
    assert_eq!(host.banners(), vec![Banner::reloading("v2")]);

    let exit = monitor.fire_auto_reload().await;
    assert_eq!(exit, Some(Exit::Reloaded { bypass_cache: true }));
    assert_eq!(host.reloads(), vec![true]);

    drop(monitor);
    assert_eq!(worker.await.unwrap(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_auto_reload_cancelled_when_form_becomes_dirty() {
    let network = MockNetwork::new();
    serve_version(&network, "v2");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut monitor, _rx) = monitor(&config(true), &network, &sessions, &host);

    tokio::time::advance(Duration::from_secs(10 * 60)).await;
    monitor.check(Trigger::Interval).await;
    monitor.unsaved_changes().set(true);

    assert_eq!(monitor.fire_auto_reload().await, None);
    assert!(host.reloads().is_empty());
    assert_eq!(monitor.shown_banner(), Some(&Banner::unsaved_work("v2")));
  }

  #[tokio::test]
  async fn test_dismissed_version_reshows_on_next_load() {
    let network = MockNetwork::new();
    serve_version(&network, "v2");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());

    let (mut first, _rx) = monitor(&config(false), &network, &sessions, &host);
    assert_eq!(first.on_load(), LoadOutcome::Clean);
    first.check(Trigger::Manual).await;
    first.dismiss();
    assert_eq!(host.hidden(), 1);
    assert_eq!(
      sessions.load("tab-1").unwrap().pending_version.as_deref(),
      Some("v2")
    );

    // Same tab navigates; the page is still the old build
    let (mut second, _rx) = monitor(&config(false), &network, &sessions, &host);
    assert_eq!(
      second.on_load(),
      LoadOutcome::Reshow {
        version: "v2".to_string()
      }
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_dismissed_version_stays_dismissed_on_same_page() {
    let network = MockNetwork::new();
    serve_version(&network, "v2");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut monitor, _rx) = monitor(&config(false), &network, &sessions, &host);
    monitor.on_load();

    monitor.check(Trigger::Manual).await;
    monitor.dismiss();

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(
      monitor.check(Trigger::Focus).await,
      CheckOutcome::Dismissed {
        version: "v2".to_string()
      }
    );
    assert_eq!(host.banners().len(), 1);
    assert_eq!(monitor.shown_banner(), None);

    // A newer deployment is offered again
    serve_version(&network, "v3");
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(matches!(
      monitor.check(Trigger::Visible).await,
      CheckOutcome::UpdateAvailable { .. }
    ));
    assert_eq!(host.banners().len(), 2);
  }

  #[tokio::test]
  async fn test_recent_check_from_earlier_load_throttles() {
    let network = MockNetwork::new();
    serve_version(&network, "v1");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());

    let (mut first, _rx) = monitor(&config(false), &network, &sessions, &host);
    first.on_load();
    assert_eq!(first.check(Trigger::Manual).await, CheckOutcome::UpToDate);

    let (mut second, _rx) = monitor(&config(false), &network, &sessions, &host);
    second.on_load();
    assert_eq!(second.check(Trigger::Manual).await, CheckOutcome::Throttled);
    assert_eq!(network.calls_to("/api/version"), 1);

    // An old check does not hold back a new load
    sessions
      .save(
        "tab-1",
        &SessionState {
          last_check_at: Some(Utc::now() - chrono::Duration::minutes(5)),
          ..Default::default()
        },
      )
      .unwrap();
    let (mut third, _rx) = monitor(&config(false), &network, &sessions, &host);
    third.on_load();
    assert_eq!(third.check(Trigger::Manual).await, CheckOutcome::UpToDate);
  }

  #[tokio::test]
  async fn test_dismissed_version_cleared_once_picked_up() {
    let network = MockNetwork::new();
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    sessions
      .save(
        "tab-1",
        &SessionState {
          local_version: Some("v1".to_string()),
          pending_version: Some("v2".to_string()),
          last_check_at: None,
        },
      )
      .unwrap();

    let mut config = config(false);
    config.version = "v2".to_string();
    let (mut monitor, _rx) = monitor(&config, &network, &sessions, &host);

    assert_eq!(monitor.on_load(), LoadOutcome::PendingCleared);
    let state = sessions.load("tab-1").unwrap();
    assert_eq!(state.pending_version, None);
    assert_eq!(state.local_version.as_deref(), Some("v2"));
    assert!(host.banners().is_empty());
  }

  #[tokio::test]
  async fn test_reload_clears_caches_first() {
    let network = MockNetwork::new();
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut monitor, rx) = monitor(&config(false), &network, &sessions, &host);
    let worker = ack_clears(rx);

    assert_eq!(monitor.reload().await, Exit::Reloaded { bypass_cache: true });
    assert_eq!(host.reloads(), vec![true]);

    drop(monitor);
    assert_eq!(worker.await.unwrap(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_reload_does_not_wait_forever_for_worker() {
    let network = MockNetwork::new();
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    // Receiver kept alive but never answered
    let (mut monitor, _rx) = monitor(&config(false), &network, &sessions, &host);

    assert_eq!(monitor.reload().await, Exit::Reloaded { bypass_cache: true });
    assert_eq!(host.reloads(), vec![true]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_checks_after_focus_settles_and_reloads_on_request() {
    let network = MockNetwork::new();
    serve_version(&network, "v2");
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (monitor, rx) = monitor(&config(false), &network, &sessions, &host);
    let worker = ack_clears(rx);
    let (events, events_rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(monitor.run(events_rx));

    events.send(PageEvent::Focus).unwrap();
    events.send(PageEvent::Focus).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(network.calls_to("/api/version"), 0, "still settling");

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(network.calls_to("/api/version"), 1);
    assert_eq!(host.banners(), vec![Banner::update_available("v2")]);

    events.send(PageEvent::Banner(BannerAction::Reload)).unwrap();
    assert_eq!(run.await.unwrap(), Exit::Reloaded { bypass_cache: true });
    assert_eq!(worker.await.unwrap(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_reshows_pending_update_after_delay() {
    let network = MockNetwork::new();
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    sessions
      .save(
        "tab-1",
        &SessionState {
          pending_version: Some("v2".to_string()),
          ..Default::default()
        },
      )
      .unwrap();
    let (monitor, _rx) = monitor(&config(false), &network, &sessions, &host);
    let (events, events_rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(monitor.run(events_rx));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(host.banners(), vec![Banner::update_available("v2")]);

    drop(events);
    assert_eq!(run.await.unwrap(), Exit::Closed);
  }

  #[tokio::test]
  async fn test_controller_change_reloads_unless_dirty() {
    let network = MockNetwork::new();
    let host = RecordingHost::default();
    let sessions = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let (mut monitor, _rx) = monitor(&config(false), &network, &sessions, &host);
    let mut settle_at = None;

    let same = PageEvent::ControllerChanged {
      version: "v1".to_string(),
    };
    assert_eq!(monitor.handle_event(same, &mut settle_at).await, None);

    monitor.unsaved_changes().set(true);
    let newer = PageEvent::ControllerChanged {
      version: "v2".to_string(),
    };
    assert_eq!(monitor.handle_event(newer.clone(), &mut settle_at).await, None);
    assert_eq!(host.banners(), vec![Banner::unsaved_work("v2")]);

    monitor.unsaved_changes().set(false);
    assert_eq!(
      monitor.handle_event(newer, &mut settle_at).await,
      Some(Exit::Reloaded {
        bypass_cache: false
      })
    );
    assert_eq!(host.reloads(), vec![false]);
  }
}
