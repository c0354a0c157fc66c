use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the finance API, e.g. "https://finance.example.com/api/v1"
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Persist eligible resources to SQLite across runs
  #[serde(default = "default_true")]
  pub disk: bool,
  /// Override the cache database path
  pub db_path: Option<PathBuf>,
  /// Default freshness window in seconds
  pub stale_after_secs: Option<u64>,
  /// Seconds an unused entry survives before collection
  pub freed_after_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      disk: true,
      db_path: None,
      stale_after_secs: None,
      freed_after_secs: None,
    }
  }
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tally.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tally/config.yaml
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
        "No configuration file found. Create one at ~/.config/tally/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tally.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tally").join("config.yaml");
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

  /// Get the API token from environment variables.
  ///
  /// Checks TALLY_API_TOKEN first, then FINANCE_API_TOKEN as fallback.
  /// The token is never read from the config file or written to the cache.
  pub fn get_api_token() -> Result<String> {
    std::env::var("TALLY_API_TOKEN")
      .or_else(|_| std::env::var("FINANCE_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set TALLY_API_TOKEN or FINANCE_API_TOKEN environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_minimal_config() {
    let config: Config = serde_yaml::from_str("api:\n  url: https://finance.example.com/api\n")
      .unwrap();
    assert_eq!(config.api.url, "https://finance.example.com/api");
    assert!(config.cache.disk);
    assert!(config.cache.stale_after_secs.is_none());
  }

  #[test]
  fn test_parse_cache_overrides() {
    let yaml = "\
api:
  url: https://finance.example.com/api
cache:
  disk: false
  stale_after_secs: 60
  freed_after_secs: 600
";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert!(!config.cache.disk);
    assert_eq!(config.cache.stale_after_secs, Some(60));
    assert_eq!(config.cache.freed_after_secs, Some(600));
  }
}
