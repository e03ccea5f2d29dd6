// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment and filesystem-layout access for the daemon.
//!
//! Two deployment roots exist, selected by the presence of the system
//! install marker: a per-user root under the XDG config/state directories,
//! and a system root under `/etc`, `/var/lib` and `/run`. The daemon
//! consumes only three paths: the state directory (persistence sidecars),
//! the control socket path, and the boot configuration file.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Daemon version reported by `ls` headers and the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Marker whose presence selects the system deployment root.
const SYSTEM_MARKER: &str = "/etc/socketley/system";

fn system_install() -> bool {
    std::path::Path::new(SYSTEM_MARKER).exists()
}

/// Resolve the state directory:
/// `SOCKETLEY_STATE_DIR` > system root > `XDG_STATE_HOME`/socketley >
/// `~/.local/state/socketley`.
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("SOCKETLEY_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if system_install() {
        return Ok(PathBuf::from("/var/lib/socketley"));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("socketley"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/socketley"))
}

/// Resolve the control socket path:
/// `SOCKETLEY_SOCKET` > `/run/socketley/daemon.sock` (system) >
/// `<state-dir>/daemon.sock`.
pub fn socket_path() -> Result<PathBuf, LifecycleError> {
    if let Ok(path) = std::env::var("SOCKETLEY_SOCKET") {
        return Ok(PathBuf::from(path));
    }
    if system_install() {
        return Ok(PathBuf::from("/run/socketley/daemon.sock"));
    }
    Ok(state_dir()?.join("daemon.sock"))
}

/// Resolve the boot configuration file:
/// `SOCKETLEY_CONFIG` > `/etc/socketley/config` (system) >
/// `~/.config/socketley/config`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SOCKETLEY_CONFIG") {
        return Some(PathBuf::from(path));
    }
    if system_install() {
        return Some(PathBuf::from("/etc/socketley/config"));
    }
    dirs::config_dir().map(|dir| dir.join("socketley/config"))
}

/// Control-channel I/O timeout.
pub fn ipc_timeout() -> Duration {
    std::env::var("SOCKETLEY_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Bound on the graceful-shutdown drain.
pub fn drain_timeout() -> Duration {
    std::env::var("SOCKETLEY_DRAIN_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}
