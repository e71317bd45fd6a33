use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::{PrecacheManifest, DEFAULT_CACHE_VERSION, DEFAULT_OFFLINE_PAGE};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the application the worker sits in front of
  pub origin: String,
  /// Cache store name; bump on every manifest or policy change
  pub cache_version: String,
  pub precache: Vec<String>,
  pub offline_page: String,
  /// Activate right after install instead of waiting
  pub skip_waiting: bool,
  /// Address the proxy listens on
  pub listen: SocketAddr,
  /// Cache database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for Config {
  fn default() -> Self {
    let manifest = PrecacheManifest::default();
    Self {
      origin: "http://127.0.0.1:8000".to_string(),
      cache_version: DEFAULT_CACHE_VERSION.to_string(),
      precache: manifest.urls().to_vec(),
      offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
      skip_waiting: true,
      listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
      database: None,
      network: NetworkConfig::default(),
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      user_agent: concat!("dossier-offline/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dossier-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dossier-offline/config.yaml
  ///
  /// Without any file the built-in defaults are used.
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
      None => Self::default(),
    };

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("dossier-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dossier-offline").join("config.yaml");
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
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    self.manifest()?;
    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }
    Ok(())
  }

  /// The application origin, which is also the worker's scope.
  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    match url.scheme() {
      "http" | "https" => Ok(url),
      scheme => Err(eyre!(
        "Invalid origin '{}': unsupported scheme {}",
        self.origin,
        scheme
      )),
    }
  }

  pub fn manifest(&self) -> Result<PrecacheManifest> {
    PrecacheManifest::new(self.precache.iter().cloned(), self.offline_page.clone())
      .map_err(|e| eyre!("{}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.cache_version, "dossier-pwa-v1");
    assert_eq!(config.precache.len(), 4);
    assert_eq!(config.offline_page, "/offline/");
    assert!(config.skip_waiting);
    assert_eq!(config.network.timeout_secs, 30);
    config.validate().unwrap();
  }

  #[test]
  fn test_partial_override() {
    let config = Config::parse(
      r#"
origin: https://dossier.example
cache_version: dossier-pwa-v2
listen: 0.0.0.0:9000
network:
  timeout_secs: 5
"#,
    )
    .unwrap();

    assert_eq!(config.origin_url().unwrap().as_str(), "https://dossier.example/");
    assert_eq!(config.cache_version, "dossier-pwa-v2");
    assert_eq!(config.listen.port(), 9000);
    assert_eq!(config.network.timeout_secs, 5);
    assert!(config.network.user_agent.starts_with("dossier-offline/"));
  }

  #[test]
  fn test_offline_page_must_be_precached() {
    let config = Config::parse(
      r#"
precache:
  - /static/manifest.json
offline_page: /offline/
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_origin_must_be_http() {
    let config = Config {
      origin: "ftp://dossier.example".to_string(),
      ..Config::default()
    };
    assert!(config.origin_url().is_err());

    let config = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(dir.path().join("nope.yaml").as_path())).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "cache_version: dossier-pwa-v3\n").unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(config.cache_version, "dossier-pwa-v3");
  }
}
