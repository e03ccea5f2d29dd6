// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: path resolution, startup, shutdown.

mod startup;
pub use startup::{startup, StartupResult};

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::boot::BootError;
use crate::registry::Registry;

/// Filesystem locations the daemon consumes.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root state directory (persistence sidecars live under it).
    pub state_dir: PathBuf,
    /// Control socket path.
    pub socket_path: PathBuf,
    /// Lock/PID file.
    pub lock_path: PathBuf,
    /// Daemon log file.
    pub log_path: PathBuf,
    /// Boot configuration file, when resolvable.
    pub config_path: Option<PathBuf>,
}

impl Paths {
    /// Resolve against the environment and the deployment root.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = crate::env::state_dir()?;
        Ok(Self {
            socket_path: crate::env::socket_path()?,
            lock_path: state_dir.join("daemon.pid"),
            log_path: state_dir.join("daemon.log"),
            config_path: crate::env::config_path(),
            state_dir,
        })
    }
}

/// Live daemon state held by the binary while running.
pub struct DaemonState {
    pub paths: Paths,
    // NOTE(lifetime): held to keep the exclusive lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub registry: Arc<Registry>,
}

impl DaemonState {
    /// Remove the socket and pid files. The lock releases on drop.
    pub fn shutdown(&self) {
        info!("shutting down daemon");
        if self.paths.socket_path.exists() {
            if let Err(error) = std::fs::remove_file(&self.paths.socket_path) {
                warn!(%error, "failed to remove socket file");
            }
        }
        if self.paths.lock_path.exists() {
            if let Err(error) = std::fs::remove_file(&self.paths.lock_path) {
                warn!(%error, "failed to remove pid file");
            }
        }
        info!("daemon shutdown complete");
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("boot config: {0}")]
    Boot(#[from] BootError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
