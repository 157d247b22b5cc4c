use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::types::ResourceKind;
use crate::sync::ledger::LedgerWindows;
use crate::sync::{RealtimeConfig, SyncWindows};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Resource shown at startup (defaults to animals)
  pub default_resource: Option<ResourceKind>,
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub realtime: RealtimeConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

fn default_page_size() -> u32 {
  10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  /// Leading part of cache keys (defaults to the API url)
  pub base_identifier: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Persist cache entries and tombstones to SQLite
  pub enabled: bool,
  pub default_ttl_secs: u64,
  /// Entries younger than this are served while revalidating
  pub fresh_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      default_ttl_secs: 300,
      fresh_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub create_bypass_secs: u64,
  pub update_bypass_secs: u64,
  pub delete_bypass_secs: u64,
  pub realtime_bypass_secs: u64,
  pub recent_write_secs: u64,
  pub recent_delete_secs: u64,
  pub tombstone_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      create_bypass_secs: 30,
      update_bypass_secs: 30,
      delete_bypass_secs: 15,
      realtime_bypass_secs: 5,
      recent_write_secs: 120,
      recent_delete_secs: 10,
      tombstone_secs: 60,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./herdbook.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/herdbook/config.yaml
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
        "No configuration file found. Create one at ~/.config/herdbook/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("herdbook.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("herdbook").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks HERDBOOK_API_TOKEN first, then API_TOKEN as fallback. `None`
  /// means requests go out unauthenticated.
  pub fn get_api_token() -> Option<String> {
    std::env::var("HERDBOOK_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .ok()
      .filter(|token| !token.trim().is_empty())
  }

  /// Leading part of every cache key.
  pub fn base_identifier(&self) -> &str {
    self
      .api
      .base_identifier
      .as_deref()
      .unwrap_or(&self.api.url)
      .trim_end_matches('/')
  }

  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.cache.default_ttl_secs)
  }

  pub fn windows(&self) -> SyncWindows {
    let sync = &self.sync;
    SyncWindows {
      fresh: Duration::from_secs(self.cache.fresh_secs),
      cache_ttl: None,
      create_bypass: Duration::from_secs(sync.create_bypass_secs),
      update_bypass: Duration::from_secs(sync.update_bypass_secs),
      delete_bypass: Duration::from_secs(sync.delete_bypass_secs),
      realtime_bypass: Duration::from_secs(sync.realtime_bypass_secs),
      ledger: LedgerWindows {
        written: Duration::from_secs(sync.recent_write_secs),
        deleted: Duration::from_secs(sync.recent_delete_secs),
      },
      tombstone: Duration::from_secs(sync.tombstone_secs),
    }
  }
}
