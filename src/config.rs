use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the app is served from. Only same-origin requests are cached.
  pub origin: Url,
  /// Override for the data directory (default: $XDG_DATA_HOME/otodo)
  pub data_dir: Option<PathBuf>,
  pub agent: AgentSettings,
  pub sync: SyncSettings,
  pub notification: NotificationSettings,
  pub connectivity: ConnectivitySettings,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      data_dir: None,
      agent: AgentSettings::default(),
      sync: SyncSettings::default(),
      notification: NotificationSettings::default(),
      connectivity: ConnectivitySettings::default(),
    }
  }
}

fn default_origin() -> Url {
  Url::parse("http://localhost:3000/").expect("static origin is a valid URL")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
  /// When false the caching agent is treated as unavailable
  pub enabled: bool,
  /// Version-tagged cache bucket name. Changing it drops older buckets on activation.
  pub cache_name: String,
  /// Exact paths eligible for caching
  pub cached_paths: Vec<String>,
  /// Answer given when the agent asks for notification permission
  pub notifications: NotificationPermission,
}

impl Default for AgentSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      cache_name: "todo-app-cache-v1".to_string(),
      cached_paths: vec!["/".to_string(), "/manifest.json".to_string()],
      notifications: NotificationPermission::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPermission {
  Granted,
  Denied,
  /// Not decided yet; notifications are not shown
  #[default]
  Default,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  pub tag: String,
  /// Path on the origin that receives pending todos
  pub endpoint: String,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      tag: "sync-todos".to_string(),
      endpoint: "/api/todos".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
  pub title: String,
  pub icon: String,
  pub badge: String,
  /// Body used when a push message carries no payload
  pub default_body: String,
}

impl Default for NotificationSettings {
  fn default() -> Self {
    Self {
      title: "Todo App".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-192x192.png".to_string(),
      default_body: "New todo notification".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivitySettings {
  /// Seconds between reachability probes of the origin
  pub poll_interval_secs: u64,
}

impl Default for ConnectivitySettings {
  fn default() -> Self {
    Self {
      poll_interval_secs: 5,
    }
  }
}

impl ConnectivitySettings {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./otodo.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/otodo/config.yaml
  ///
  /// Falls back to built-in defaults when no file exists.
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
      None => Config::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("otodo.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("otodo").join("config.yaml");
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

  fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Replace the origin, re-checking the result.
  pub fn with_origin(self, origin: Url) -> Result<Self> {
    let config = Config { origin, ..self };
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("origin must be an http(s) URL, got {}", self.origin));
    }
    if self.agent.cache_name.trim().is_empty() {
      return Err(eyre!("agent.cache_name must not be empty"));
    }
    if let Some(path) = self.agent.cached_paths.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("cached path {:?} must start with '/'", path));
    }
    Ok(())
  }

  /// Directory holding the databases and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("otodo"))
  }
}
