// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion events.
//!
//! Every I/O task tags its result with the owning runtime's id and, where
//! applicable, a connection id. The engine loop dispatches on that tag;
//! the tag is opaque to the tasks themselves, exactly one handler owns it,
//! and the handler outlives every event tagged with it (deferred
//! destruction keeps removed runtimes alive until their events drain).

use std::net::SocketAddr;

use bytes::Bytes;
use socketley_core::RuntimeId;
use socketley_wire::{CmdStatus, Command};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Engine-local connection id (the fd→connection index key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interactive control-channel session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Which connect submission a `Connected` completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Client engine's main connection.
    ClientMain,
    /// Server upstream link by index.
    Upstream(usize),
    /// Proxy backend on behalf of an accepted client.
    ProxyBackend { client: ConnId, backend: usize },
    /// Cache follower's link to its leader.
    CacheFollower,
}

/// One-shot timer tags. Recurring ticks are resubmitted by their handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Client/follower reconnect backoff expired.
    Reconnect,
    /// Upstream reconnect backoff expired.
    UpstreamReconnect(usize),
    /// Idle-connection sweep.
    IdleSweep,
    /// Proxy health-check tick.
    HealthTick,
    /// Proxy pool idle sweep.
    PoolSweep,
    /// Cache TTL sampling tick.
    TtlTick,
    /// Deferred-destruction drain tick (no runtime tag).
    ReapTick,
}

/// Reply to one control command.
#[derive(Debug)]
pub struct CmdReply {
    pub status: CmdStatus,
    pub body: String,
    /// Set when an interactive start succeeded: the listener switches the
    /// connection to raw streaming against this runtime/session.
    pub session: Option<(RuntimeId, SessionId)>,
}

impl CmdReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: CmdStatus::Ok, body: body.into(), session: None }
    }

    pub fn user_error(body: impl Into<String>) -> Self {
        Self { status: CmdStatus::UserError, body: body.into(), session: None }
    }

    pub fn internal_error(body: impl Into<String>) -> Self {
        Self { status: CmdStatus::InternalError, body: body.into(), session: None }
    }
}

/// A control command in flight from the listener to the engine.
#[derive(Debug)]
pub struct ControlMsg {
    pub command: Command,
    pub reply: oneshot::Sender<CmdReply>,
    /// Output channel for `start -i`; lines the runtime prints are
    /// mirrored here once the session is registered.
    pub session_out: Option<mpsc::Sender<Bytes>>,
}

/// Everything the engine loop dispatches on.
#[derive(Debug)]
pub enum Event {
    /// Control command from the listener.
    Control(ControlMsg),
    /// Line typed into an interactive session.
    SessionLine { rt: RuntimeId, session: SessionId, line: String },
    /// Interactive session disconnected.
    SessionClosed { rt: RuntimeId, session: SessionId },

    /// Listener accepted a TCP connection.
    Accepted { rt: RuntimeId, stream: TcpStream, peer: SocketAddr },
    /// Accept failed (EMFILE and friends); the accept task has already
    /// backed off before resubmitting.
    AcceptError { rt: RuntimeId, error: std::io::Error },
    /// Bytes arrived on a connection.
    ConnData { rt: RuntimeId, conn: ConnId, data: Bytes },
    /// Read side finished: EOF, error, or cancellation.
    ReadClosed { rt: RuntimeId, conn: ConnId, error: Option<std::io::Error> },
    /// Write side finished: queue closed and flushed, error, or abort.
    WriteClosed { rt: RuntimeId, conn: ConnId, error: Option<std::io::Error> },
    /// Datagram received on a UDP runtime.
    Datagram { rt: RuntimeId, peer: SocketAddr, data: Bytes },
    /// Outbound connect finished.
    Connected {
        rt: RuntimeId,
        target: ConnectTarget,
        result: Result<TcpStream, std::io::Error>,
        /// Address the connector resolved, for the per-target cache.
        resolved: Option<SocketAddr>,
    },
    /// Health probe verdict for a proxy backend.
    Probe { rt: RuntimeId, backend: usize, healthy: bool },
    /// A submitted timeout fired.
    Timer { rt: Option<RuntimeId>, kind: TimerKind },

    /// Signal path: drain everything and exit the loop.
    Shutdown,
}
