use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheConfig, ResponseOrdering};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Project id opened on the board at startup
  pub default_project: Option<u64>,
  /// Custom title for header (defaults to the API host if not set)
  pub title: Option<String>,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub board: BoardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  /// Pre-filled in the login form
  pub username: Option<String>,
  /// Sent as `X-Tenant-ID` on every request
  pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
  #[serde(default = "default_gc_secs")]
  pub gc_secs: u64,
  #[serde(default)]
  pub ordering: ResponseOrdering,
}

fn default_stale_secs() -> u64 {
  60
}

fn default_gc_secs() -> u64 {
  300
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      gc_secs: default_gc_secs(),
      ordering: ResponseOrdering::default(),
    }
  }
}

impl CacheSettings {
  pub fn to_cache_config(&self) -> CacheConfig {
    CacheConfig {
      stale_time: Duration::from_secs(self.stale_secs),
      gc_time: Duration::from_secs(self.gc_secs),
      ordering: self.ordering,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardConfig {
  /// Column ids or titles to hide on the board (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_set")]
  pub hide_columns: BTreeSet<String>,
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./taskeri.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/taskeri/config.yaml
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
        "No configuration file found. Create one at ~/.config/taskeri/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("taskeri.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("taskeri").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let url = Url::parse(&self.api.url).map_err(|e| eyre!("api.url is not a valid URL: {}", e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("api.url must use http or https, got {}", url.scheme()));
    }
    Ok(())
  }

  /// Get the password from the environment, if set.
  ///
  /// Checks TASKERI_PASSWORD.
  pub fn get_password() -> Option<String> {
    std::env::var("TASKERI_PASSWORD")
      .ok()
      .filter(|p| !p.is_empty())
  }
}
