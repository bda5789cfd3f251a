// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Loaded from a TOML file at startup and again on reload. A reload that
//! fails to parse is fatal to the daemon, so the previous configuration is
//! never silently kept.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no state directory available")]
    NoStateDir,
}

/// One printer queue definition.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PrinterConfig {
    pub name: String,
    /// Device URI handed to the backend, e.g. `usb://HP/DeskJet%20990C`
    pub device_uri: String,
    /// Advertise on the local network when browsing is enabled
    #[serde(default)]
    pub shared: bool,
    /// Filter pipeline; the last entry is the backend program
    #[serde(default = "default_filters")]
    pub filters: Vec<String>,
}

fn default_filters() -> Vec<String> {
    vec!["spoold-usb".to_string()]
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// TCP listen addresses
    pub listen: Vec<String>,
    /// Client idle timeout in seconds
    pub timeout: u64,
    /// Maximum time to wait for quiescence before a forced reload
    pub reload_timeout: u64,
    /// Maximum simultaneous clients
    pub max_clients: usize,
    /// Enable the browse socket
    pub browsing: bool,
    pub browse_port: u16,
    /// Seconds between adverts for each shared printer
    pub browse_interval: u64,
    /// Seconds after which an unre-advertised remote printer is dropped
    pub browse_timeout: u64,
    /// Root certificate rotation period in seconds; zero disables
    pub root_cert_duration: u64,
    /// Stats log cadence in seconds; zero disables
    pub stats_interval: u64,
    /// Run unprivileged; HUP becomes a graceful stop
    pub run_as_user: bool,
    /// State directory; defaults to the platform state dir
    pub state_dir: Option<PathBuf>,
    #[serde(rename = "printer")]
    pub printers: Vec<PrinterConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: vec!["127.0.0.1:6631".to_string()],
            timeout: 300,
            reload_timeout: 60,
            max_clients: 100,
            browsing: false,
            browse_port: 6631,
            browse_interval: 30,
            browse_timeout: 300,
            root_cert_duration: 300,
            stats_interval: 60,
            run_as_user: false,
            state_dir: None,
            printers: Vec::new(),
        }
    }
}

impl Config {
    /// Load and parse the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// State directory for the lock file, log, and certificates.
    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .map(|d| d.join("spoold"))
            .ok_or(ConfigError::NoStateDir)
    }

    pub fn log_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.state_dir()?.join("spoold.log"))
    }

    pub fn lock_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.state_dir()?.join("spoold.pid"))
    }

    pub fn certs_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.state_dir()?.join("certs"))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
