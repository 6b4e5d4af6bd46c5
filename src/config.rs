use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://litenkod.se";

pub const MIN_SQUAD_SIZE: usize = 1;
pub const MAX_SQUAD_SIZE: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the legend roster and pages are fetched from.
  pub base_url: String,
  /// Where the caches and the roster snapshot live
  /// (defaults to the platform data directory).
  pub data_dir: Option<PathBuf>,
  /// How many legends a draw picks by default.
  pub squad_size: usize,
  /// Custom title for the header (defaults to the base URL host)
  pub title: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      data_dir: None,
      squad_size: 1,
      title: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lgnd.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lgnd/config.yaml
  /// 4. ~/.config/lgnd/config.yaml
  ///
  /// No file found means defaults; the app runs without configuration.
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
    let local = PathBuf::from("lgnd.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lgnd").join("config.yaml");
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

    config.validate()
  }

  fn validate(self) -> Result<Self> {
    if !(MIN_SQUAD_SIZE..=MAX_SQUAD_SIZE).contains(&self.squad_size) {
      return Err(eyre!(
        "squad_size must be between {} and {}",
        MIN_SQUAD_SIZE,
        MAX_SQUAD_SIZE
      ));
    }
    Ok(self)
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.base_url).map_err(|e| eyre!("Invalid base_url {}: {}", self.base_url, e))
  }

  /// Resolve the data directory, creating it if missing.
  pub fn data_dir(&self) -> Result<PathBuf> {
    let dir = match &self.data_dir {
      Some(dir) => dir.clone(),
      None => dirs::data_dir()
        .ok_or_else(|| eyre!("Could not determine a data directory"))?
        .join("lgnd"),
    };
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create data directory {}: {}", dir.display(), e))?;
    Ok(dir)
  }

  /// Header title: configured override or the base URL host.
  pub fn title(&self) -> String {
    if let Some(title) = &self.title {
      return title.clone();
    }
    self
      .base_url()
      .ok()
      .and_then(|u| u.host_str().map(String::from))
      .unwrap_or_else(|| self.base_url.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.squad_size, 1);
    assert_eq!(config.title(), "litenkod.se");
  }

  #[test]
  fn test_parse_yaml() {
    let config: Config = serde_yaml::from_str(
      "base_url: https://example.com\nsquad_size: 3\ntitle: Ranked Night\n",
    )
    .unwrap();
    let config = config.validate().unwrap();
    assert_eq!(config.base_url, "https://example.com");
    assert_eq!(config.squad_size, 3);
    assert_eq!(config.title(), "Ranked Night");
  }

  #[test]
  fn test_partial_yaml_uses_defaults() {
    let config: Config = serde_yaml::from_str("squad_size: 2\n").unwrap();
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.squad_size, 2);
  }

  #[test]
  fn test_squad_size_out_of_range_rejected() {
    let config: Config = serde_yaml::from_str("squad_size: 9\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_bad_base_url() {
    let config = Config {
      base_url: "not a url".into(),
      ..Config::default()
    };
    assert!(config.base_url().is_err());
  }
}
