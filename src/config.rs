use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_TTL_DAYS;
use crate::sync::DEFAULT_MAX_RETRIES;

/// Longest cache lifetime accepted from config, in days.
const MAX_TTL_DAYS: i64 = 3650;

/// Settings read from `fieldsync.yaml` or `$XDG_CONFIG_HOME/fieldsync/config.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL every request path is appended to, e.g. `https://field.example.com/api`
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Path requested by the connectivity check
  #[serde(default = "default_probe_path")]
  pub probe_path: String,
  /// Seconds between reachability checks in `watch`
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_path: default_probe_path(),
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

fn default_probe_path() -> String {
  "/health".to_string()
}

fn default_probe_interval_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Days a cached response stays servable (1 to 3650)
  #[serde(default = "default_ttl_days")]
  pub ttl_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_days: default_ttl_days(),
    }
  }
}

fn default_ttl_days() -> i64 {
  DEFAULT_TTL_DAYS
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Failed replays allowed before a queued write is dropped
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Per-action replay timeout in seconds. Unset means the transport decides.
  pub action_timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      action_timeout_secs: None,
    }
  }
}

fn default_max_retries() -> u32 {
  DEFAULT_MAX_RETRIES
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file for cache and queue (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
  ///
  /// `FIELDSYNC_BASE_URL` overrides `api.base_url`.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/fieldsync/config.yaml"
        ))
      }
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and validate YAML configuration.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    url::Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", config.api.base_url, e))?;
    if config.network.probe_interval_secs == 0 {
      return Err(eyre!("network.probe_interval_secs must be greater than zero"));
    }
    if !(1..=MAX_TTL_DAYS).contains(&config.cache.ttl_days) {
      return Err(eyre!(
        "cache.ttl_days must be between 1 and {}, got {}",
        MAX_TTL_DAYS,
        config.cache.ttl_days
      ));
    }
    if config.sync.action_timeout_secs == Some(0) {
      return Err(eyre!("sync.action_timeout_secs must be greater than zero"));
    }

    Ok(config)
  }

  fn with_env_overrides(mut self) -> Self {
    if let Ok(base_url) = std::env::var("FIELDSYNC_BASE_URL") {
      self.api.base_url = base_url;
    }
    self
  }

  /// Cache lifetime. Out-of-range values fall back to the default.
  pub fn cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::try_days(self.cache.ttl_days)
      .filter(|ttl| *ttl > chrono::Duration::zero())
      .unwrap_or_else(|| chrono::Duration::days(DEFAULT_TTL_DAYS))
  }

  /// Replay timeout per queued write, if configured.
  pub fn action_timeout(&self) -> Option<Duration> {
    self.sync.action_timeout_secs.map(Duration::from_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.network.probe_interval_secs)
  }

  /// Storage file, falling back to the user data directory.
  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => crate::storage::SqliteStorage::default_path().map_err(|e| eyre!("{}", e)),
    }
  }

  /// Directory for log files written by long-running commands.
  pub fn log_dir(&self) -> Result<PathBuf> {
    let storage = self.storage_path()?;
    storage
      .parent()
      .map(Path::to_path_buf)
      .ok_or_else(|| eyre!("Storage path {} has no parent directory", storage.display()))
  }
}
