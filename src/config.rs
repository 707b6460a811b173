use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Assets stored in the static partition at install time.
pub const DEFAULT_PRECACHE: &[&str] = &[
  "/",
  "/index.html",
  "/css/style.css",
  "/css/chat.css",
  "/css/settings.css",
  "/js/alpine.min.js",
  "/js/app.js",
  "/js/bael-master-controller.js",
  "/js/bael-theme-system.js",
  "/js/bael-command-palette.js",
  "/js/bael-chat-essentials.js",
  "/public/favicon.ico",
  "/public/icon-192.png",
  "/public/icon-512.png",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin whose requests are intercepted and cached
  pub origin: String,
  /// Address the caching proxy listens on
  pub listen: String,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  /// Database file (defaults to $XDG_DATA_HOME/bael-offline/bael-offline.db)
  pub database: Option<PathBuf>,
  /// Directory for rolling log files; logs go to stderr when unset
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://127.0.0.1:50001".to_string(),
      listen: "127.0.0.1:50080".to_string(),
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      database: None,
      log_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every partition this app owns
  pub prefix: String,
  /// Version suffix; bumping it retires the old partitions on activate
  pub version: String,
  /// Path prefix routed to stale-while-revalidate
  pub api_prefix: String,
  /// Endpoint queued messages are replayed to
  pub message_endpoint: String,
  pub precache: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "bael-".to_string(),
      version: "v1".to_string(),
      api_prefix: "/api/".to_string(),
      message_endpoint: "/api/message".to_string(),
      precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bael-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bael-offline/config.yaml
  ///
  /// Defaults apply when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bael-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bael-offline").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }
}
