use color_eyre::{eyre::eyre, Result};
use std::fmt;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Partition opened, manifest being pre-cached
  Installing,
  /// Install finished, waiting to take over from the current controller
  Installed,
  /// Controlling pages and intercepting fetches
  Active,
  /// Replaced by a newer version
  Superseded,
}

impl WorkerState {
  pub fn can_intercept_fetch(self) -> bool {
    matches!(self, WorkerState::Active)
  }

  /// Move to `next`, rejecting transitions the lifecycle does not allow.
  pub fn advance(self, next: WorkerState) -> Result<WorkerState> {
    use WorkerState::{Active, Installed, Installing, Superseded};

    match (self, next) {
      (Installing, Installed)
      | (Installed, Active)
      | (Installed, Superseded)
      | (Active, Superseded) => Ok(next),
      _ => Err(eyre!("Invalid worker transition: {} -> {}", self, next)),
    }
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Active => write!(f, "active"),
      WorkerState::Superseded => write!(f, "superseded"),
    }
  }
}
