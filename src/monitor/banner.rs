//! Notification contract between the monitor and the page.

/// What the banner tells the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
  UpdateAvailable,
  /// Update available but the open form has unsaved changes
  UnsavedWork,
  /// Automatic reload is about to happen
  Reloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerAction {
  Reload,
  Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
  /// Server version the banner announces
  pub version: String,
  pub kind: BannerKind,
  /// Zero, one or two actions
  pub actions: Vec<BannerAction>,
}

impl Banner {
  pub fn update_available(version: &str) -> Self {
    Self {
      version: version.to_string(),
      kind: BannerKind::UpdateAvailable,
      actions: vec![BannerAction::Reload, BannerAction::Dismiss],
    }
  }

  pub fn unsaved_work(version: &str) -> Self {
    Self {
      version: version.to_string(),
      kind: BannerKind::UnsavedWork,
      actions: vec![BannerAction::Dismiss],
    }
  }

  pub fn reloading(version: &str) -> Self {
    Self {
      version: version.to_string(),
      kind: BannerKind::Reloading,
      actions: Vec::new(),
    }
  }

  pub fn message(&self) -> &'static str {
    match self.kind {
      BannerKind::UpdateAvailable => "A new version is available. Reload to update.",
      BannerKind::UnsavedWork => {
        "A new version is available. Save your work first, then reload to update."
      }
      BannerKind::Reloading => "Updating to the new version...",
    }
  }
}

/// The page the monitor runs in. Rendering is up to the implementor.
pub trait PageHost: Send + Sync {
  fn show_banner(&self, banner: &Banner);

  fn hide_banner(&self);

  /// Reload the page; `bypass_cache` skips any cached document.
  fn reload(&self, bypass_cache: bool);
}
