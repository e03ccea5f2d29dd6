// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live runtime state and the four engine implementations.
//!
//! [`LiveRuntime`] is everything a running runtime owns on the engine
//! thread: its connection table, interactive sessions, an engine-local
//! copy of the configuration, and the per-kind state machine. The shared
//! registry record holds only what status readers need.

pub mod cache;
pub mod client;
pub mod proxy;
pub mod server;

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use socketley_core::{RuntimeConfig, RuntimeId, RuntimeKind, TokenBucket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::engine::conn::{ConnRole, Connection, Proto};
use crate::engine::event::{ConnId, SessionId};
use crate::registry::RuntimeShared;

/// Per-kind live state.
pub enum KindState {
    Server(server::ServerState),
    Client(client::ClientState),
    Proxy(proxy::ProxyState),
    Cache(cache::CacheState),
    /// `attach`ed foreign process: tracked, no I/O.
    External,
}

/// A runtime's engine-thread state while it is running (or draining).
pub struct LiveRuntime {
    pub shared: Arc<RuntimeShared>,
    /// Engine-local configuration copy, refreshed on `edit`.
    pub cfg: RuntimeConfig,
    /// Parent token for this runtime's listeners, timers and probes.
    pub cancel: CancellationToken,
    pub conns: HashMap<ConnId, Connection>,
    pub sessions: HashMap<SessionId, mpsc::Sender<Bytes>>,
    pub global_bucket: TokenBucket,
    pub kind: KindState,
}

impl LiveRuntime {
    pub fn new(shared: Arc<RuntimeShared>, now: Instant) -> Self {
        let cfg = shared.config.lock().clone();
        let kind = if shared.is_external() {
            KindState::External
        } else {
            match shared.kind {
                RuntimeKind::Server => KindState::Server(server::ServerState::default()),
                RuntimeKind::Client => KindState::Client(client::ClientState::default()),
                RuntimeKind::Proxy => KindState::Proxy(proxy::ProxyState::new(&cfg)),
                RuntimeKind::Cache => KindState::Cache(cache::CacheState::new(&cfg)),
            }
        };
        let global_bucket = TokenBucket::new(cfg.global_rate, now);
        Self {
            shared,
            cfg,
            cancel: CancellationToken::new(),
            conns: HashMap::new(),
            sessions: HashMap::new(),
            global_bucket,
            kind,
        }
    }

    pub fn id(&self) -> RuntimeId {
        self.shared.id.clone()
    }

    pub fn name(&self) -> String {
        self.shared.name()
    }

    /// Refresh the engine-local config copy (after `edit`) and re-tune the
    /// pieces derived from it.
    pub fn refresh_cfg(&mut self) {
        self.cfg = self.shared.config.lock().clone();
        self.global_bucket.set_rate(self.cfg.global_rate);
        for conn in self.conns.values_mut() {
            conn.bucket.set_rate(self.cfg.conn_rate);
        }
    }

    /// Frame and queue a text message for one connection, honoring its
    /// detected protocol. Overflow closes the connection.
    pub fn send_text(&mut self, conn_id: ConnId, text: &str) {
        let Some(conn) = self.conns.get_mut(&conn_id) else {
            return;
        };
        if conn.closing {
            return;
        }
        let blob = match conn.proto {
            Proto::WsActive => Bytes::from(server::ws::text_frame(text)),
            _ => {
                let mut line = String::with_capacity(text.len() + 1);
                line.push_str(text);
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                Bytes::from(line)
            }
        };
        let len = blob.len() as u64;
        if conn.push_write(blob) {
            self.shared.counters.add_out(len);
        } else {
            warn!(runtime = %self.shared.name(), conn = %conn_id, "write queue overflow, closing");
            conn.begin_close(false);
        }
    }

    /// Queue pre-framed bytes (RESP replies, WS control frames, HTTP).
    pub fn send_raw(&mut self, conn_id: ConnId, blob: Bytes) {
        let Some(conn) = self.conns.get_mut(&conn_id) else {
            return;
        };
        if conn.closing {
            return;
        }
        let len = blob.len() as u64;
        if conn.push_write(blob) {
            self.shared.counters.add_out(len);
        } else {
            warn!(runtime = %self.shared.name(), conn = %conn_id, "write queue overflow, closing");
            conn.begin_close(false);
        }
    }

    /// Deliver to every broadcast-eligible connection except `except`.
    /// FIFO per destination; concurrent across destinations.
    pub fn broadcast(&mut self, text: &str, except: Option<ConnId>) {
        let targets: Vec<ConnId> = self
            .conns
            .values()
            .filter(|conn| {
                !conn.closing
                    && Some(conn.id) != except
                    && matches!(conn.role, ConnRole::Peer)
                    && matches!(conn.proto, Proto::Unknown | Proto::Line | Proto::WsActive)
            })
            .map(|conn| conn.id)
            .collect();
        for target in targets {
            self.send_text(target, text);
        }
    }

    /// Mirror a line to every attached interactive session. Sessions that
    /// cannot keep up are detached.
    pub fn mirror(&mut self, line: &str) {
        if self.sessions.is_empty() {
            return;
        }
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        if !framed.ends_with('\n') {
            framed.push('\n');
        }
        let blob = Bytes::from(framed);
        self.sessions.retain(|_, out| out.try_send(blob.clone()).is_ok());
    }

    /// Append a received message to the configured log/write files.
    pub fn log_message(&self, line: &str) {
        use std::io::Write as _;
        if let Some(path) = &self.cfg.log_file {
            let entry = format!("{}\n", line);
            if let Err(error) =
                std::fs::OpenOptions::new().create(true).append(true).open(path).and_then(
                    |mut file| file.write_all(entry.as_bytes()),
                )
            {
                warn!(runtime = %self.shared.name(), %error, "log file write failed");
            }
        }
        if let Some(path) = &self.cfg.write_file {
            if let Err(error) =
                std::fs::OpenOptions::new().create(true).append(true).open(path).and_then(
                    |mut file| file.write_all(line.as_bytes()),
                )
            {
                warn!(runtime = %self.shared.name(), %error, "write file append failed");
            }
        }
    }

    /// Half-close one connection.
    pub fn close_conn(&mut self, conn_id: ConnId, drain: bool) {
        if let Some(conn) = self.conns.get_mut(&conn_id) {
            conn.begin_close(drain);
        }
    }

    /// Teardown: half-close every connection. Structs stay in the table
    /// until their I/O tasks report; the next setup clears leftovers.
    pub fn close_all(&mut self, drain: bool) {
        for conn in self.conns.values_mut() {
            if !conn.closing {
                conn.begin_close(drain);
            }
        }
    }

    /// True when every connection's halves have reported.
    pub fn drained(&self) -> bool {
        self.conns.values().all(|conn| conn.is_released())
    }
}
