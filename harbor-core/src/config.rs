//! Per-user configuration at `~/.harbor/config.yaml`.
//!
//! Every key is optional; a missing file yields [`HarborConfig::default`].
//! As with manifests, `load_at(home)` takes an explicit home directory and
//! `load()` derives it from `dirs::home_dir()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarborConfig {
    /// Container engine binary.
    pub docker: String,
    /// Image run for every port proxy.
    pub proxy_image: String,
    pub reachability: ReachabilityConfig,
    pub sync: SyncConfig,
}

/// Bounded poll used between launching one service and the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    pub interval_ms: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub flush_interval_ms: u64,
    /// Capacity of the channel between a change source and its sync.
    pub change_buffer: usize,
}

impl Default for HarborConfig {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
            proxy_image: "harbor/proxy".to_string(),
            reachability: ReachabilityConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            attempts: 50,
        }
    }
}

impl ReachabilityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            change_buffer: 1024,
        }
    }
}

impl SyncConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// `<home>/.harbor/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".harbor").join("config.yaml")
}

/// Load the config under `home`, falling back to defaults when absent.
pub fn load_at(home: &Path) -> Result<HarborConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(HarborConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<HarborConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = HarborConfig::default();
        assert_eq!(config.docker, "docker");
        assert_eq!(config.reachability.interval(), Duration::from_millis(100));
        assert_eq!(config.reachability.attempts, 50);
        assert_eq!(config.sync.flush_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config: HarborConfig =
            serde_yaml::from_str("reachability:\n  attempts: 5\n").expect("parse");
        assert_eq!(config.reachability.attempts, 5);
        assert_eq!(config.reachability.interval_ms, 100);
        assert_eq!(config.proxy_image, "harbor/proxy");
    }
}
