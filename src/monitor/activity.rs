use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Shared "current form has unsaved changes" flag.
///
/// Form collaborators own the value and call [`UnsavedChanges::set`]
/// whenever dirtiness changes; the monitor only reads it.
#[derive(Debug, Clone, Default)]
pub struct UnsavedChanges(Arc<AtomicBool>);

impl UnsavedChanges {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, dirty: bool) {
    self.0.store(dirty, Ordering::SeqCst);
  }

  pub fn get(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Tracks the last user interaction.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
  last_interaction: Instant,
  idle_threshold: Duration,
}

impl ActivityTracker {
  /// Page load counts as an interaction.
  pub fn new(idle_threshold: Duration) -> Self {
    Self {
      last_interaction: Instant::now(),
      idle_threshold,
    }
  }

  pub fn record(&mut self) {
    self.last_interaction = Instant::now();
  }

  pub fn is_idle(&self) -> bool {
    self.last_interaction.elapsed() >= self.idle_threshold
  }
}
