// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-socket client.

use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use socketley_wire::{read_reply, CmdStatus};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// A connected control-channel session.
pub struct DaemonClient {
    stream: UnixStream,
    timeout: Duration,
}

impl DaemonClient {
    /// Connect to the daemon's socket (path resolved like the daemon
    /// resolves it).
    pub async fn connect() -> Result<Self> {
        let path = socketley_daemon::env::socket_path()
            .map_err(|error| anyhow!("cannot resolve socket path: {}", error))?;
        let stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("daemon not running? ({})", path.display()))?;
        Ok(Self { stream, timeout: socketley_daemon::env::ipc_timeout() })
    }

    /// Send one command line and read its framed reply.
    pub async fn exec(&mut self, line: &str) -> Result<(CmdStatus, String)> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        let (status, body) = read_reply(&mut self.stream, self.timeout).await?;
        Ok((status, String::from_utf8_lossy(&body).into_owned()))
    }

    /// Interactive attach: after a successful `start -i` the framing ends
    /// and stdin/stdout bridge raw into the runtime.
    pub async fn interactive(mut self, line: &str) -> Result<CmdStatus> {
        let (status, body) = self.exec(line).await?;
        if status != CmdStatus::Ok {
            if !body.is_empty() {
                eprintln!("{}", body);
            }
            return Ok(status);
        }
        if !body.is_empty() {
            eprintln!("{}", body);
        }

        let (mut sock_read, mut sock_write) = self.stream.into_split();
        let stdin_task = tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let _ = tokio::io::copy(&mut stdin, &mut sock_write).await;
            let _ = sock_write.shutdown().await;
        });
        let mut stdout = tokio::io::stdout();
        let _ = tokio::io::copy(&mut sock_read, &mut stdout).await;
        stdin_task.abort();
        Ok(CmdStatus::Ok)
    }
}
