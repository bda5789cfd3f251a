// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Root authentication certificate rotation.
//!
//! The root certificate is a random token file local clients read to
//! prove they can act as an administrator. It is rotated on a fixed
//! cadence so a leaked token has a bounded lifetime.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CertError {
    #[error("unable to write certificate {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct CertStore {
    dir: PathBuf,
    /// When the current root certificate was issued
    pub root_cert_time: u64,
    /// Rotation period in seconds; zero disables rotation
    pub duration: u64,
}

impl CertStore {
    /// Create the store and issue the initial root certificate.
    pub fn init(dir: PathBuf, duration: u64, now: u64) -> Result<Self, CertError> {
        let mut store = Self {
            dir,
            root_cert_time: now,
            duration,
        };
        store.issue(now)?;
        Ok(store)
    }

    pub fn root_cert_path(&self) -> PathBuf {
        self.dir.join("root")
    }

    pub fn needs_rotation(&self, now: u64) -> bool {
        self.duration > 0 && now.saturating_sub(self.root_cert_time) >= self.duration
    }

    /// Replace the root certificate with a fresh token.
    pub fn rotate(&mut self, now: u64) -> Result<(), CertError> {
        let path = self.root_cert_path();
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("unable to remove old root certificate: {e}");
            }
        }
        self.issue(now)
    }

    fn issue(&mut self, now: u64) -> Result<(), CertError> {
        let path = self.root_cert_path();
        let token = uuid::Uuid::new_v4().simple().to_string();

        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&self.dir)?;
            fs::write(&path, &token)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
            Ok(())
        };
        write().map_err(|source| CertError::Write {
            path: path.clone(),
            source,
        })?;

        self.root_cert_time = now;
        debug!("issued root certificate at {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
#[path = "cert_tests.rs"]
mod tests;
