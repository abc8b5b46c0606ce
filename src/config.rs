use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the page is served from (scheme, host and port)
  pub origin: Url,
  /// Build version baked into the page and worker
  pub version: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Version partitions are named `{prefix}-{version}`
  pub prefix: String,
  /// Fixed name of the partition holding the offline document
  pub offline_partition: String,
  pub offline_path: String,
  /// Static assets pre-cached on install
  pub manifest: Vec<String>,
  /// Path prefixes that always go to the network
  pub never_cache: Vec<String>,
  pub request_timeout_secs: u64,
  /// SQLite database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "shellcache".to_string(),
      offline_partition: "shellcache-offline".to_string(),
      offline_path: "/offline.html".to_string(),
      manifest: vec![
        "/".to_string(),
        "/static/css/style.css".to_string(),
        "/static/js/app.js".to_string(),
        "/static/img/logo.png".to_string(),
        "/offline.html".to_string(),
      ],
      never_cache: vec![
        "/api/".to_string(),
        "/auth/".to_string(),
        "/session".to_string(),
      ],
      request_timeout_secs: 30,
      database: None,
    }
  }
}

impl CacheConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  pub version_path: String,
  pub poll_interval_secs: u64,
  /// Minimum spacing between two server round-trips
  pub min_check_interval_secs: u64,
  pub settle_delay_ms: u64,
  pub idle_threshold_secs: u64,
  pub auto_reload: bool,
  pub auto_reload_delay_secs: u64,
  /// Delay before re-showing a dismissed update on the next load
  pub reshow_delay_secs: u64,
  pub clear_ack_timeout_secs: u64,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      version_path: "/api/version".to_string(),
      poll_interval_secs: 30 * 60,
      min_check_interval_secs: 30,
      settle_delay_ms: 1000,
      idle_threshold_secs: 5 * 60,
      auto_reload: false,
      auto_reload_delay_secs: 5,
      reshow_delay_secs: 3,
      clear_ack_timeout_secs: 5,
    }
  }
}

impl MonitorConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }

  pub fn min_check_interval(&self) -> Duration {
    Duration::from_secs(self.min_check_interval_secs)
  }

  pub fn settle_delay(&self) -> Duration {
    Duration::from_millis(self.settle_delay_ms)
  }

  pub fn idle_threshold(&self) -> Duration {
    Duration::from_secs(self.idle_threshold_secs)
  }

  pub fn auto_reload_delay(&self) -> Duration {
    Duration::from_secs(self.auto_reload_delay_secs)
  }

  pub fn reshow_delay(&self) -> Duration {
    Duration::from_secs(self.reshow_delay_secs)
  }

  pub fn clear_ack_timeout(&self) -> Duration {
    Duration::from_secs(self.clear_ack_timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    Ok(config)
  }

  /// Database location: configured path or `$XDG_DATA_HOME/shellcache/cache.db`.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }
}
