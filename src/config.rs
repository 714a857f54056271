// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Harness configuration.
//!
//! Values come from an optional TOML file, then `PLUGIN_HARNESS_*`
//! environment variables override individual fields.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host settings store handed to the plugin at start.
pub type Settings = BTreeMap<String, String>;

pub const ENV_TIMEOUT_MS: &str = "PLUGIN_HARNESS_TIMEOUT_MS";
pub const ENV_POLL_MS: &str = "PLUGIN_HARNESS_POLL_MS";
pub const ENV_CAPACITY: &str = "PLUGIN_HARNESS_CAPACITY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("environment variable {name}={value:?} is not a number")]
    Env { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Upper bound on any single parcel wait.
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Undrained parcels the capture channel holds before dropping.
    pub capture_capacity: usize,
    pub settings: Settings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5000,
            poll_interval_ms: 25,
            capture_capacity: 4096,
            settings: Settings::new(),
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { name, value }),
        Err(_) => Ok(None),
    }
}

impl HarnessConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File (if given) plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        cfg.with_env()
    }

    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_number(ENV_TIMEOUT_MS)? {
            self.wait_timeout_ms = v;
        }
        if let Some(v) = env_number(ENV_POLL_MS)? {
            self.poll_interval_ms = v;
        }
        if let Some(v) = env_number(ENV_CAPACITY)? {
            self.capture_capacity = v;
        }
        debug!("harness config: {self:?}");
        Ok(self)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        env::remove_var(ENV_TIMEOUT_MS);
        env::remove_var(ENV_POLL_MS);
        env::remove_var(ENV_CAPACITY);
    }

    #[test]
    #[serial]
    fn defaults_without_file() {
        clear_env();
        let cfg = HarnessConfig::load(None).unwrap();
        assert_eq!(cfg, HarnessConfig::default());
        assert_eq!(cfg.wait_timeout(), Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn file_then_env() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        fs::write(
            &path,
            "wait_timeout_ms = 750\n[settings]\nagent_id = \"ci-01\"\n",
        )
        .unwrap();
        env::set_var(ENV_CAPACITY, "32");
        let cfg = HarnessConfig::load(Some(&path)).unwrap();
        clear_env();
        assert_eq!(cfg.wait_timeout_ms, 750);
        assert_eq!(cfg.capture_capacity, 32);
        assert_eq!(cfg.poll_interval_ms, 25);
        assert_eq!(cfg.settings.get("agent_id").map(String::as_str), Some("ci-01"));
    }

    #[test]
    #[serial]
    fn bad_env_value() {
        clear_env();
        env::set_var(ENV_TIMEOUT_MS, "soon");
        let err = HarnessConfig::load(None).unwrap_err();
        clear_env();
        assert!(matches!(err, ConfigError::Env { name: ENV_TIMEOUT_MS, .. }));
    }

    #[test]
    fn bad_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "wait_timeout_ms = \"long\"").unwrap();
        assert!(matches!(
            HarnessConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
