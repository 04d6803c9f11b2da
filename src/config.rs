//! Engine configuration.
//!
//! Loaded from a YAML file when one exists; every field has a default so the
//! engine runs with no configuration at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Store location; defaults to the platform data directory
  pub db_path: Option<PathBuf>,
  /// How long synced outbox items are retained before garbage collection
  pub retention_hours: u64,
  /// Periodic drain trigger
  pub drain_interval_secs: u64,
  /// Periodic outbox garbage-collection trigger
  pub gc_interval_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      db_path: None,
      retention_hours: 24,
      drain_interval_secs: 300,
      gc_interval_secs: 3600,
    }
  }
}

impl EngineConfig {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./edudesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/edudesk/offline.yaml
  ///
  /// No file found means built-in defaults, not an error.
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
    let local = PathBuf::from("edudesk.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("edudesk").join("offline.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: EngineConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Default database path under the platform data directory.
  pub fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("edudesk").join("offline.db"))
  }

  pub fn retention(&self) -> Duration {
    Duration::from_secs(self.retention_hours * 3600)
  }

  pub fn drain_interval(&self) -> Duration {
    Duration::from_secs(self.drain_interval_secs)
  }

  pub fn gc_interval(&self) -> Duration {
    Duration::from_secs(self.gc_interval_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn missing_file_means_defaults() {
    let config = EngineConfig::load(None).unwrap();
    assert_eq!(config.retention_hours, 24);
    assert_eq!(config.drain_interval_secs, 300);
    assert!(config.db_path.is_none());
  }

  #[test]
  fn explicit_missing_path_is_an_error() {
    assert!(EngineConfig::load(Some(Path::new("/nonexistent/edudesk.yaml"))).is_err());
  }

  #[test]
  fn partial_yaml_fills_in_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "retention_hours: 48").unwrap();

    let config = EngineConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.retention_hours, 48);
    assert_eq!(config.gc_interval_secs, 3600);
    assert_eq!(config.retention(), Duration::from_secs(48 * 3600));
  }
}
