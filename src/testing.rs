//! Test doubles shared across module tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{Request, Response};
use crate::monitor::{Banner, PageHost};
use crate::net::Network;

pub const ORIGIN: &str = "https://notes.example.com";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Default)]
struct MockState {
  routes: HashMap<String, Response>,
  calls: Vec<String>,
}

/// In-process network keyed by path. Unknown paths return 404, and the whole
/// network can be switched offline.
#[derive(Clone, Default)]
pub struct MockNetwork {
  state: Arc<Mutex<MockState>>,
  offline: Arc<AtomicBool>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, path: &str, response: Response) -> &Self {
    self
      .state
      .lock()
      .unwrap()
      .routes
      .insert(path.to_string(), response);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of fetches attempted for `path`, including failed ones.
  pub fn calls_to(&self, path: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .calls
      .iter()
      .filter(|p| p.as_str() == path)
      .count()
  }
}

impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let path = request.url.path().to_string();
    let mut state = self.state.lock().unwrap();
    state.calls.push(path.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable"));
    }

    Ok(
      state
        .routes
        .get(&path)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

#[derive(Default)]
struct HostLog {
  banners: Vec<Banner>,
  hidden: usize,
  reloads: Vec<bool>,
}

/// Page host that records what the monitor asked it to do.
#[derive(Clone, Default)]
pub struct RecordingHost {
  log: Arc<Mutex<HostLog>>,
}

impl RecordingHost {
  pub fn banners(&self) -> Vec<Banner> {
    self.log.lock().unwrap().banners.clone()
  }

  pub fn hidden(&self) -> usize {
    self.log.lock().unwrap().hidden
  }

  /// `bypass_cache` flag of every reload, in order
  pub fn reloads(&self) -> Vec<bool> {
    self.log.lock().unwrap().reloads.clone()
  }
}

impl PageHost for RecordingHost {
  fn show_banner(&self, banner: &Banner) {
    self.log.lock().unwrap().banners.push(banner.clone());
  }

  fn hide_banner(&self) {
    self.log.lock().unwrap().hidden += 1;
  }

  fn reload(&self, bypass_cache: bool) {
    self.log.lock().unwrap().reloads.push(bypass_cache);
  }
}
