// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-runtime persistence: one JSON sidecar per runtime name.
//!
//! Written on every configuration-affecting mutation, deleted on remove,
//! scanned once at boot. A sidecar that fails to parse is logged and
//! skipped so one corrupt file cannot keep the fleet down.

use std::fs;
use std::path::{Path, PathBuf};

use socketley_core::RuntimeSpec;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sidecar directory handle.
#[derive(Debug, Clone)]
pub struct Sidecars {
    dir: PathBuf,
}

impl Sidecars {
    pub fn new(state_dir: &Path) -> Self {
        Self { dir: state_dir.join("runtimes") }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Write one sidecar atomically (temp file + rename).
    pub fn save(&self, spec: &RuntimeSpec) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .map_err(|source| StoreError::Io { path: self.dir.clone(), source })?;
        let path = self.path_for(&spec.name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(spec)?;
        fs::write(&tmp, body).map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })?;
        Ok(())
    }

    /// Remove a runtime's sidecar. Absence is not an error.
    pub fn delete(&self, name: &str) {
        let path = self.path_for(name);
        if let Err(error) = fs::remove_file(&path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %error, "failed to delete sidecar");
            }
        }
    }

    /// Rename a sidecar along with its runtime.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), StoreError> {
        let from = self.path_for(old);
        if !from.exists() {
            return Ok(());
        }
        let to = self.path_for(new);
        fs::rename(&from, &to).map_err(|source| StoreError::Io { path: from, source })
    }

    /// Load a single spec file (also used by `import`).
    pub fn load_file(path: &Path) -> Result<RuntimeSpec, StoreError> {
        let text = fs::read_to_string(path)
            .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Scan the sidecar directory. Unreadable entries are skipped with a
    /// warning; the result is sorted by name for deterministic restore order.
    pub fn load_all(&self) -> Vec<RuntimeSpec> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut specs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(spec) => specs.push(spec),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable sidecar")
                }
            }
        }
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
