use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::policy::RouteTable;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub site: SiteConfig,
  pub cache: CacheConfig,
  #[serde(default)]
  pub gateway: GatewayConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Override for the data directory holding the cache database and logs.
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  /// Origin every site-relative path is resolved against.
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Version tag embedded in every store name. Bumping it invalidates all
  /// prior stores on the next activation.
  pub version: String,
  /// Files cached unconditionally at install.
  pub core_files: Vec<String>,
  /// Secondary resources (icons) cached after activation.
  #[serde(default)]
  pub static_assets: Vec<String>,
  /// Page served for navigations when both network and cache miss.
  #[serde(default = "default_offline_path")]
  pub offline_path: String,
  /// Per-destination routing table.
  #[serde(default)]
  pub routes: RouteTable,
}

fn default_offline_path() -> String {
  "/offline.html".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
  pub host: String,
  pub port: u16,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 8787,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Site update".to_string(),
      body: "New update available!".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./webstash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/webstash/config.yaml
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
        "No configuration file found. Create one at ~/.config/webstash/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("webstash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("webstash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Directory holding the cache database and gateway logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("webstash"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::policy::{Destination, Strategy};

  const EXAMPLE: &str = r#"
site:
  url: https://example.com
cache:
  version: site-v1.1.0
  core_files:
    - /
    - /index.html
    - /styles.css
    - https://cdn.example.net/all.min.css
  static_assets:
    - /icons/icon-192x192.png
"#;

  #[test]
  fn test_parse_minimal_config() {
    let config: Config = serde_yaml::from_str(EXAMPLE).unwrap();

    assert_eq!(config.site.url, "https://example.com");
    assert_eq!(config.cache.version, "site-v1.1.0");
    assert_eq!(config.cache.core_files.len(), 4);
    assert_eq!(config.cache.offline_path, "/offline.html");
    assert_eq!(config.gateway.port, 8787);
    assert_eq!(config.notifications.body, "New update available!");
  }

  #[test]
  fn test_route_override() {
    let yaml = format!(
      "{}  routes:\n    document:\n      strategy: cache-first\n      store: static\n",
      EXAMPLE
    );
    let config: Config = serde_yaml::from_str(&yaml).unwrap();

    let doc = config.cache.routes.route(Destination::Document);
    assert_eq!(doc.strategy, Strategy::CacheFirst);
    // Unspecified destinations keep their defaults
    let other = config.cache.routes.route(Destination::Other);
    assert_eq!(other.strategy, Strategy::NetworkFirst);
  }

  #[test]
  fn test_missing_version_rejected() {
    let yaml = "site:\n  url: https://example.com\ncache:\n  core_files: []\n";
    assert!(serde_yaml::from_str::<Config>(yaml).is_err());
  }
}
