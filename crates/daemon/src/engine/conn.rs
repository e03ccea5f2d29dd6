// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection state shared by the server, proxy and cache engines.
//!
//! The destroy protocol: `read_open` and `write_open` flip false only when
//! the corresponding I/O task reports its terminal event. A connection
//! leaves the table when both are false, never earlier, no matter what
//! errors arrived in between. `begin_close` half-closes: it cancels the
//! reader, ends the write queue (draining or aborting), and leaves the
//! struct in the table until both halves have reported.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use socketley_core::TokenBucket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::event::ConnId;
use crate::runtime::cache::CacheConnState;
use crate::runtime::proxy::ProxyClientState;
use crate::runtime::server::ws;

/// Wire protocol detected on a connection. Runs once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Unknown,
    /// LF-delimited text.
    Line,
    /// Saw `GET `, collecting the request head.
    HttpUpgrading,
    /// RFC 6455 frames.
    WsActive,
    /// RESP2 arrays (cache runtimes).
    Resp,
}

/// Captured WebSocket handshake headers of interest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsHandshake {
    pub cookie: Option<String>,
    pub origin: Option<String>,
    pub protocol: Option<String>,
    pub authorization: Option<String>,
}

/// What a connection is to its runtime.
pub enum ConnRole {
    /// Accepted server peer.
    Peer,
    /// Server upstream link (index into the upstream table).
    Upstream(usize),
    /// Client engine's single outbound connection.
    ClientMain,
    /// Proxy accepted client.
    ProxyClient(ProxyClientState),
    /// Proxy backend serving a client connection.
    ProxyBackend { client: ConnId, backend: usize },
    /// Idle pooled proxy backend awaiting reuse.
    PooledBackend { backend: usize, since: Instant },
    /// Cache client.
    CacheClient(CacheConnState),
    /// Cache follower's leader link.
    CacheFollower,
}

impl std::fmt::Debug for ConnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnRole::Peer => "Peer",
            ConnRole::Upstream(_) => "Upstream",
            ConnRole::ClientMain => "ClientMain",
            ConnRole::ProxyClient(_) => "ProxyClient",
            ConnRole::ProxyBackend { .. } => "ProxyBackend",
            ConnRole::PooledBackend { .. } => "PooledBackend",
            ConnRole::CacheClient(_) => "CacheClient",
            ConnRole::CacheFollower => "CacheFollower",
        };
        write!(f, "{}", name)
    }
}

/// One live connection. Buffers and flags are owned here; the I/O tasks
/// hold only the stream halves and channel endpoints.
pub struct Connection {
    pub id: ConnId,
    pub peer: Option<SocketAddr>,
    /// Write queue sender; `None` once the queue has been ended.
    writer: Option<mpsc::Sender<Bytes>>,
    pub cancel_read: CancellationToken,
    pub cancel_write: CancellationToken,
    pub read_open: bool,
    pub write_open: bool,
    pub closing: bool,
    /// Read accumulator, bounded by the partial-size cap.
    pub acc: BytesMut,
    pub proto: Proto,
    pub ws: Option<WsHandshake>,
    pub ws_frames: ws::Assembler,
    pub bucket: TokenBucket,
    pub last_activity: Instant,
    pub meta: HashMap<String, String>,
    pub authed_master: bool,
    pub auth_failures: u32,
    pub role: ConnRole,
}

impl Connection {
    pub fn new(
        id: ConnId,
        peer: Option<SocketAddr>,
        writer: mpsc::Sender<Bytes>,
        cancel_read: CancellationToken,
        cancel_write: CancellationToken,
        rate: u32,
        now: Instant,
        role: ConnRole,
    ) -> Self {
        Self {
            id,
            peer,
            writer: Some(writer),
            cancel_read,
            cancel_write,
            read_open: true,
            write_open: true,
            closing: false,
            acc: BytesMut::new(),
            proto: Proto::Unknown,
            ws: None,
            ws_frames: ws::Assembler::default(),
            bucket: TokenBucket::new(rate, now),
            last_activity: now,
            meta: HashMap::new(),
            authed_master: false,
            auth_failures: 0,
            role,
        }
    }

    /// Queue a blob for writing. Returns false when the queue is at its
    /// cap; the caller must close the connection (resource-exhaust
    /// policy). A queue that is already ended swallows the blob.
    #[must_use]
    pub fn push_write(&mut self, blob: Bytes) -> bool {
        match &self.writer {
            Some(writer) => match writer.try_send(blob) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => false,
                Err(mpsc::error::TrySendError::Closed(_)) => true,
            },
            None => true,
        }
    }

    /// Half-close. With `drain` the writer flushes what is already queued
    /// before shutting the socket down; without it the writer aborts.
    pub fn begin_close(&mut self, drain: bool) {
        self.closing = true;
        self.cancel_read.cancel();
        if !drain {
            self.cancel_write.cancel();
        }
        // Dropping the sender ends the queue; the writer task exits after
        // its final flush (or immediately, if aborted above).
        self.writer = None;
        // Release buffered bytes promptly; the struct itself stays in the
        // table until both halves report.
        self.acc = BytesMut::new();
    }

    /// Both I/O tasks have reported; the struct may leave the table.
    pub fn is_released(&self) -> bool {
        !self.read_open && !self.write_open
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("proto", &self.proto)
            .field("role", &self.role)
            .field("read_open", &self.read_open)
            .field("write_open", &self.write_open)
            .field("closing", &self.closing)
            .finish()
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
