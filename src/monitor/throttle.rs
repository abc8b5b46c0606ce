use std::time::Duration;
use tokio::time::Instant;

/// Allows at most one server check per `min_interval`.
#[derive(Debug, Clone)]
pub struct Throttle {
  min_interval: Duration,
  last: Option<Instant>,
}

impl Throttle {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last: None,
    }
  }

  /// Record a check made at `at`, e.g. by an earlier load of the page.
  pub fn mark(&mut self, at: Instant) {
    self.last = Some(at);
  }

  /// Claim the next slot. Returns false while inside the window of the
  /// previous claim.
  pub fn try_acquire(&mut self) -> bool {
    let now = Instant::now();
    match self.last {
      Some(last) if now.duration_since(last) < self.min_interval => false,
      _ => {
        self.last = Some(now);
        true
      }
    }
  }
}
