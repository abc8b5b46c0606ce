//! What to do when the server reports a different version.

/// Inputs to the decision, captured at the moment a mismatch is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
  pub unsaved_changes: bool,
  pub idle: bool,
  pub auto_reload: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  /// Banner warning about unsaved work; dismiss only, never reload
  WarnUnsaved,
  /// User is active: banner with reload and dismiss
  OfferReload,
  /// Idle with auto-reload enabled: reload after a short delay
  AutoReload,
  /// Idle with auto-reload disabled: banner with reload and dismiss
  Notify,
}

impl Decision {
  pub fn reloads_automatically(self) -> bool {
    matches!(self, Decision::AutoReload)
  }
}

/// First match wins: unsaved work, then recent activity, then policy.
pub fn decide(snapshot: Snapshot) -> Decision {
  if snapshot.unsaved_changes {
    Decision::WarnUnsaved
  } else if !snapshot.idle {
    Decision::OfferReload
  } else if snapshot.auto_reload {
    Decision::AutoReload
  } else {
    Decision::Notify
  }
}
