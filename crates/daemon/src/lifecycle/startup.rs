// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: lock, bind, restore the fleet.

use std::fs::File;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt as _;
use std::sync::Arc;

use fs2::FileExt as _;
use tokio::net::UnixListener;
use tracing::{info, warn};

use super::{DaemonState, LifecycleError, Paths};
use crate::engine::{Engine, EngineHandle};
use crate::registry::Registry;
use crate::storage::Sidecars;

/// Everything `main` needs wired together.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub socket: UnixListener,
    pub engine: Engine,
    pub handle: EngineHandle,
}

/// Acquire the lock, bind the control socket (0666), restore persisted
/// runtimes and start the ones that were running.
pub fn startup(paths: Paths) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&paths.state_dir)?;

    // Exclusive lock first: a second daemon must fail fast.
    let mut lock_file = File::create(&paths.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let _ = writeln!(lock_file, "{}", std::process::id());

    // A leftover socket from a crashed daemon would fail the bind.
    if paths.socket_path.exists() {
        warn!(path = %paths.socket_path.display(), "removing stale socket");
        let _ = std::fs::remove_file(&paths.socket_path);
    }
    if let Some(parent) = paths.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let socket = UnixListener::bind(&paths.socket_path)
        .map_err(|error| LifecycleError::BindFailed(paths.socket_path.clone(), error))?;
    std::fs::set_permissions(&paths.socket_path, std::fs::Permissions::from_mode(0o666))?;

    let registry = Arc::new(Registry::new());
    let storage = Sidecars::new(&paths.state_dir);
    let (mut engine, handle) = Engine::new(Arc::clone(&registry), storage);
    engine.restore();

    info!(socket = %paths.socket_path.display(), "daemon started");
    Ok(StartupResult {
        daemon: DaemonState { paths, lock_file, registry },
        socket,
        engine,
        handle,
    })
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
