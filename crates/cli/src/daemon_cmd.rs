// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `socketley daemon`: process management for socketleyd.

use std::io::BufRead as _;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Subcommand;

use crate::client::DaemonClient;

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon (background unless --foreground)
    Start {
        /// Run in the foreground (useful for debugging)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Check daemon status
    Status,
}

pub async fn run(command: DaemonCommand) -> Result<i32> {
    match command {
        DaemonCommand::Start { foreground } => start(foreground).await,
        DaemonCommand::Stop => stop().await,
        DaemonCommand::Status => status().await,
    }
}

fn find_daemon_binary() -> Result<PathBuf> {
    // Installed next to the CLI binary.
    let me = std::env::current_exe().context("cannot locate current executable")?;
    let sibling = me.with_file_name("socketleyd");
    if sibling.exists() {
        return Ok(sibling);
    }
    // Fall back to PATH.
    Ok(PathBuf::from("socketleyd"))
}

async fn start(foreground: bool) -> Result<i32> {
    if DaemonClient::connect().await.is_ok() {
        println!("daemon already running");
        return Ok(0);
    }
    let binary = find_daemon_binary()?;
    if foreground {
        let status = std::process::Command::new(&binary)
            .env("SOCKETLEY_LOG_STDERR", "1")
            .status()
            .with_context(|| format!("failed to run {}", binary.display()))?;
        return Ok(status.code().unwrap_or(1));
    }

    let mut child = std::process::Command::new(&binary)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .stdin(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {}", binary.display()))?;

    // The daemon prints READY once the socket is bound.
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("no daemon stdout"))?;
    let mut lines = std::io::BufReader::new(stdout).lines();
    match lines.next() {
        Some(Ok(line)) if line.trim() == "READY" => {
            println!("daemon started");
            Ok(0)
        }
        _ => {
            bail!("daemon did not become ready; check the daemon log");
        }
    }
}

async fn stop() -> Result<i32> {
    let paths = socketley_daemon::lifecycle::Paths::load()
        .map_err(|error| anyhow!("cannot resolve paths: {}", error))?;
    let pid_text = match std::fs::read_to_string(&paths.lock_path) {
        Ok(text) => text,
        Err(_) => {
            println!("daemon not running");
            return Ok(0);
        }
    };
    let pid: i32 = pid_text.trim().parse().context("bad pid file")?;

    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid),
        nix::sys::signal::Signal::SIGTERM,
    )
    .with_context(|| format!("failed to signal pid {}", pid))?;

    // The daemon unlinks its socket as the last shutdown step.
    let deadline = Instant::now() + Duration::from_secs(10);
    while paths.socket_path.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if paths.socket_path.exists() {
        bail!("daemon did not stop in time");
    }
    println!("daemon stopped");
    Ok(0)
}

async fn status() -> Result<i32> {
    match DaemonClient::connect().await {
        Ok(mut client) => {
            let (_, body) = client.exec("ps").await?;
            println!("daemon running");
            print!("{}", body);
            Ok(0)
        }
        Err(_) => {
            println!("daemon not running");
            Ok(1)
        }
    }
}
