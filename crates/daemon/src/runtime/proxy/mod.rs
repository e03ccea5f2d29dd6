// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy engine: HTTP and raw-TCP forwarding with backend selection,
//! health checking, circuit breaking, request retries and a keep-alive
//! backend pool.

pub mod balance;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use socketley_core::runtime::PARTIAL_BUFFER_CAP;
use socketley_core::{KindConfig, ProxyConfig, RuntimeConfig};
use tracing::{debug, warn};

use crate::engine::conn::ConnRole;
use crate::engine::event::{ConnId, ConnectTarget, TimerKind};
use crate::engine::{io, EngineCtx};
use crate::http;
use crate::runtime::{KindState, LiveRuntime};
use balance::Backend;

/// Replayable request bytes are capped; larger requests forgo retries.
const SAVED_REQUEST_CAP: usize = 64 * 1024;

/// Forwarding phase of an accepted client connection.
pub enum Phase {
    /// Waiting for enough bytes to pick a backend.
    Idle,
    /// Backend connect in flight; client bytes buffer here meanwhile.
    Connecting { backend: usize, pending: Vec<u8> },
    /// Streaming between client and a live backend connection.
    Piping { backend: usize, backend_conn: ConnId },
    /// Terminal: error response queued or request given up.
    Done,
}

/// Per-client forwarding state.
pub struct ProxyClientState {
    pub phase: Phase,
    pub retries_left: u32,
    /// Backends already tried for this request.
    pub tried: Vec<usize>,
    /// Bytes to replay on retry; `None` once a response byte has been
    /// forwarded or the request outgrew the cap.
    pub saved_request: Option<Vec<u8>>,
    pub response_started: bool,
    pub method: String,
    pub path: String,
}

impl ProxyClientState {
    pub fn new(retries: u32) -> Self {
        Self {
            phase: Phase::Idle,
            retries_left: retries,
            tried: Vec::new(),
            saved_request: None,
            response_started: false,
            method: String::new(),
            path: String::new(),
        }
    }
}

/// Live proxy state: the backend table and the keep-alive pool.
pub struct ProxyState {
    pub backends: Vec<Backend>,
    pub rr: usize,
    pub pool: HashMap<usize, Vec<ConnId>>,
}

impl ProxyState {
    pub fn new(cfg: &RuntimeConfig) -> Self {
        let entries: Vec<Backend> = match &cfg.kind {
            KindConfig::Proxy(p) => p.backends.iter().map(|e| Backend::new(e)).collect(),
            _ => Vec::new(),
        };
        Self { backends: entries, rr: 0, pool: HashMap::new() }
    }
}

fn proxy_cfg(rt: &LiveRuntime) -> ProxyConfig {
    match &rt.cfg.kind {
        KindConfig::Proxy(p) => p.clone(),
        _ => ProxyConfig::default(),
    }
}

/// Idempotent methods may be retried without the retry-all flag.
fn idempotent(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "OPTIONS" | "TRACE" | "PUT" | "DELETE")
}

/// Engine setup: listener plus the periodic health and pool timers.
pub fn setup(ctx: &mut EngineCtx, rt: &mut LiveRuntime) -> Result<(), String> {
    if rt.cfg.port == 0 {
        return Err("proxy has no port (edit <name> port=<n>)".to_string());
    }
    let cfg = proxy_cfg(rt);
    if cfg.backends.is_empty() {
        return Err("proxy has no backends (edit <name> backends=host:port,...)".to_string());
    }
    let listener =
        io::listen_tcp(rt.cfg.port).map_err(|e| format!("bind {} failed: {}", rt.cfg.port, e))?;
    io::spawn_accept(listener, ctx.events_tx.clone(), rt.id(), rt.cancel.child_token());
    if cfg.health_interval_secs > 0 {
        io::spawn_timer(
            ctx.events_tx.clone(),
            Some(rt.id()),
            TimerKind::HealthTick,
            Duration::from_secs(cfg.health_interval_secs),
            rt.cancel.child_token(),
        );
    }
    if cfg.pool_idle_secs > 0 {
        io::spawn_timer(
            ctx.events_tx.clone(),
            Some(rt.id()),
            TimerKind::PoolSweep,
            Duration::from_secs(cfg.pool_idle_secs),
            rt.cancel.child_token(),
        );
    }
    Ok(())
}

/// Accepted client connection.
pub fn on_accepted(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
) {
    let retries = proxy_cfg(rt).retries;
    ctx.register_stream(rt, stream, Some(peer), ConnRole::ProxyClient(ProxyClientState::new(retries)));
}

/// What the staged borrow of a client connection decided.
enum ClientAction {
    None,
    /// Request head ready: pick a backend and go.
    Start { pending: Vec<u8> },
    /// Path did not carry this proxy's prefix.
    NotFound,
    /// Head was malformed.
    BadRequest,
    /// Forward raw bytes to the live backend connection.
    Forward { backend_conn: ConnId, data: Vec<u8> },
    /// Accumulator exceeded its cap.
    Overflow,
}

/// Bytes from an accepted client.
pub fn on_client_data(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, data: Bytes) {
    rt.shared.counters.add_in(data.len() as u64);
    let now = ctx.now();
    let http_mode = proxy_cfg(rt).http;
    let name = rt.name();

    let action = {
        let Some(conn) = rt.conns.get_mut(&conn_id) else {
            return;
        };
        conn.touch(now);
        let ConnRole::ProxyClient(state) = &mut conn.role else {
            // Stray bytes on a pooled backend: retire it.
            conn.begin_close(false);
            return;
        };
        match &mut state.phase {
            Phase::Idle => {
                conn.acc.extend_from_slice(&data);
                if conn.acc.len() > PARTIAL_BUFFER_CAP {
                    ClientAction::Overflow
                } else if http_mode {
                    match request_line(&conn.acc) {
                        None => ClientAction::None,
                        Some(Err(())) => ClientAction::BadRequest,
                        Some(Ok((method, path, version, line_len))) => {
                            match strip_prefix(&path, &name) {
                                None => ClientAction::NotFound,
                                Some(stripped) => {
                                    state.method = method.clone();
                                    state.path = stripped.clone();
                                    let mut pending = format!(
                                        "{} {} {}\r\n",
                                        method, stripped, version
                                    )
                                    .into_bytes();
                                    pending.extend_from_slice(&conn.acc[line_len..]);
                                    conn.acc.clear();
                                    ClientAction::Start { pending }
                                }
                            }
                        }
                    }
                } else {
                    // TCP mode: the first read triggers backend selection.
                    let pending = conn.acc.split().to_vec();
                    ClientAction::Start { pending }
                }
            }
            Phase::Connecting { pending, .. } => {
                pending.extend_from_slice(&data);
                if pending.len() > PARTIAL_BUFFER_CAP {
                    ClientAction::Overflow
                } else {
                    append_saved(state, &data);
                    ClientAction::None
                }
            }
            Phase::Piping { backend_conn, .. } => {
                let backend_conn = *backend_conn;
                append_saved(state, &data);
                ClientAction::Forward { backend_conn, data: data.to_vec() }
            }
            Phase::Done => ClientAction::None,
        }
    };

    match action {
        ClientAction::None => {}
        ClientAction::Overflow => {
            warn!(runtime = %name, conn = %conn_id, "partial buffer cap exceeded, closing");
            rt.close_conn(conn_id, false);
        }
        ClientAction::BadRequest => {
            rt.send_raw(conn_id, Bytes::from(http::bad_request()));
            finish_client(rt, conn_id);
        }
        ClientAction::NotFound => {
            rt.send_raw(conn_id, Bytes::from(http::not_found()));
            finish_client(rt, conn_id);
        }
        ClientAction::Start { pending } => start_request(ctx, rt, conn_id, pending),
        ClientAction::Forward { backend_conn, data } => {
            rt.send_raw(backend_conn, Bytes::from(data));
        }
    }
}

fn append_saved(state: &mut ProxyClientState, data: &[u8]) {
    if state.response_started {
        return;
    }
    if let Some(saved) = &mut state.saved_request {
        if saved.len() + data.len() > SAVED_REQUEST_CAP {
            state.saved_request = None;
        } else {
            saved.extend_from_slice(data);
        }
    }
}

/// Parse the request line once complete: `(method, path, version, length)`.
#[allow(clippy::type_complexity)]
fn request_line(acc: &[u8]) -> Option<Result<(String, String, String, usize), ()>> {
    let end = acc.windows(2).position(|w| w == b"\r\n")?;
    let line = match std::str::from_utf8(&acc[..end]) {
        Ok(line) => line,
        Err(_) => return Some(Err(())),
    };
    let mut parts = line.split(' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version), None) if path.starts_with('/') => Some(Ok((
            method.to_string(),
            path.to_string(),
            version.to_string(),
            end + 2,
        ))),
        _ => Some(Err(())),
    }
}

/// `/gw/api/users` with proxy name `gw` → `/api/users`; `/gw` → `/`.
/// Anything else is a 404.
fn strip_prefix(path: &str, name: &str) -> Option<String> {
    let rest = path.strip_prefix('/')?.strip_prefix(name)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        // Keep the query string intact; the prefix is path-only.
        Some(rest.to_string())
    } else {
        None
    }
}

/// Pick a backend for a buffered request and dispatch it, reusing a pooled
/// connection when one is idle.
fn start_request(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, pending: Vec<u8>) {
    let cfg = proxy_cfg(rt);
    let now = ctx.now();

    let hook_choice = {
        let (method, path) = match rt.conns.get(&conn_id) {
            Some(conn) => match &conn.role {
                ConnRole::ProxyClient(state) => (state.method.clone(), state.path.clone()),
                _ => return,
            },
            None => return,
        };
        ctx.hooks
            .get(&rt.name())
            .and_then(|hooks| hooks.on_route.as_ref())
            .and_then(|hook| hook(&method, &path))
    };

    let choice = {
        let Some(conn) = rt.conns.get_mut(&conn_id) else {
            return;
        };
        let ConnRole::ProxyClient(state) = &mut conn.role else {
            return;
        };
        if cfg.http {
            state.saved_request = Some(pending.clone());
        }
        let tried = state.tried.clone();
        let KindState::Proxy(proxy) = &mut rt.kind else {
            return;
        };
        balance::select(
            &mut proxy.backends,
            cfg.strategy,
            &mut proxy.rr,
            &tried,
            now,
            Duration::from_secs(cfg.circuit_timeout_secs),
            hook_choice,
        )
    };

    let Some(backend) = choice else {
        debug!(runtime = %rt.name(), "no available backend");
        fail_client(rt, conn_id, cfg.http);
        return;
    };
    dispatch_to_backend(ctx, rt, conn_id, backend, pending, &cfg);
}

/// Send a buffered request to `backend`: reuse a pooled connection or
/// submit a connect.
fn dispatch_to_backend(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    conn_id: ConnId,
    backend: usize,
    pending: Vec<u8>,
    cfg: &ProxyConfig,
) {
    // Pool reuse path.
    let pooled = match &mut rt.kind {
        KindState::Proxy(proxy) => {
            proxy.pool.get_mut(&backend).and_then(|idle| idle.pop())
        }
        _ => None,
    };
    if let Some(backend_conn) = pooled {
        if rt.conns.get(&backend_conn).map(|c| !c.closing).unwrap_or(false) {
            if let Some(conn) = rt.conns.get_mut(&backend_conn) {
                conn.role = ConnRole::ProxyBackend { client: conn_id, backend };
            }
            if let Some(conn) = rt.conns.get_mut(&conn_id) {
                if let ConnRole::ProxyClient(state) = &mut conn.role {
                    state.tried.push(backend);
                    state.phase = Phase::Piping { backend, backend_conn };
                }
            }
            debug!(runtime = %rt.name(), backend, "reusing pooled backend connection");
            rt.send_raw(backend_conn, Bytes::from(pending));
            return;
        }
    }

    let entry = match &rt.kind {
        KindState::Proxy(proxy) => proxy.backends.get(backend).map(|b| b.entry.clone()),
        _ => None,
    };
    let addr = entry.as_deref().and_then(|entry| balance::resolve_entry(&ctx.registry, entry));
    let Some(addr) = addr else {
        // Unresolvable backend counts as a connect failure.
        record_backend_failure(ctx, rt, backend, cfg);
        retry_or_fail(ctx, rt, conn_id, cfg);
        return;
    };

    if let Some(conn) = rt.conns.get_mut(&conn_id) {
        if let ConnRole::ProxyClient(state) = &mut conn.role {
            state.tried.push(backend);
            state.phase = Phase::Connecting { backend, pending };
        }
    }
    io::spawn_connect(
        ctx.events_tx.clone(),
        rt.id(),
        ConnectTarget::ProxyBackend { client: conn_id, backend },
        addr,
        None,
        rt.cancel.child_token(),
    );
}

fn record_backend_failure(ctx: &mut EngineCtx, rt: &mut LiveRuntime, backend: usize, cfg: &ProxyConfig) {
    let now = ctx.now();
    if let KindState::Proxy(proxy) = &mut rt.kind {
        if let Some(slot) = proxy.backends.get_mut(backend) {
            slot.circuit.record_failure(now, cfg.circuit_threshold);
        }
    }
}

/// Backend connect completion.
pub fn on_backend_connected(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    client: ConnId,
    backend: usize,
    result: Result<tokio::net::TcpStream, std::io::Error>,
) {
    let cfg = proxy_cfg(rt);
    // The client may have vanished while the connect was in flight.
    let client_waiting = matches!(
        rt.conns.get(&client).map(|c| &c.role),
        Some(ConnRole::ProxyClient(state)) if matches!(state.phase, Phase::Connecting { .. })
    );

    match result {
        Ok(stream) => {
            if !client_waiting {
                // Late completion: nothing to serve, drop the stream.
                return;
            }
            let backend_conn =
                ctx.register_stream(rt, stream, None, ConnRole::ProxyBackend { client, backend });
            let pending = match rt.conns.get_mut(&client) {
                Some(conn) => match &mut conn.role {
                    ConnRole::ProxyClient(state) => {
                        let prior = std::mem::replace(
                            &mut state.phase,
                            Phase::Piping { backend, backend_conn },
                        );
                        match prior {
                            Phase::Connecting { pending, .. } => pending,
                            _ => Vec::new(),
                        }
                    }
                    _ => Vec::new(),
                },
                None => Vec::new(),
            };
            if !pending.is_empty() {
                rt.send_raw(backend_conn, Bytes::from(pending));
            }
        }
        Err(error) => {
            debug!(runtime = %rt.name(), backend, %error, "backend connect failed");
            record_backend_failure(ctx, rt, backend, &cfg);
            if client_waiting {
                retry_or_fail(ctx, rt, client, &cfg);
            }
        }
    }
}

/// Retry against a different backend when the request is replayable,
/// otherwise fail the client.
fn retry_or_fail(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, cfg: &ProxyConfig) {
    let replay = {
        let Some(conn) = rt.conns.get_mut(&conn_id) else {
            return;
        };
        let ConnRole::ProxyClient(state) = &mut conn.role else {
            return;
        };
        let allowed = !state.response_started
            && state.retries_left > 0
            && (cfg.retry_all || !cfg.http || idempotent(&state.method));
        if allowed {
            match &state.saved_request {
                Some(saved) => {
                    state.retries_left -= 1;
                    state.phase = Phase::Idle;
                    Some(saved.clone())
                }
                // TCP mode keeps the pending bytes in the phase itself.
                None => match std::mem::replace(&mut state.phase, Phase::Idle) {
                    Phase::Connecting { pending, .. } if !cfg.http => {
                        state.retries_left -= 1;
                        Some(pending)
                    }
                    prior => {
                        state.phase = prior;
                        None
                    }
                },
            }
        } else {
            None
        }
    };

    match replay {
        Some(bytes) => start_request(ctx, rt, conn_id, bytes),
        None => fail_client(rt, conn_id, cfg.http),
    }
}

/// Terminal error toward the client: 502 in HTTP mode, plain close in TCP.
fn fail_client(rt: &mut LiveRuntime, conn_id: ConnId, http_mode: bool) {
    if http_mode {
        rt.send_raw(conn_id, Bytes::from(http::bad_gateway()));
    }
    finish_client(rt, conn_id);
}

fn finish_client(rt: &mut LiveRuntime, conn_id: ConnId) {
    if let Some(conn) = rt.conns.get_mut(&conn_id) {
        if let ConnRole::ProxyClient(state) = &mut conn.role {
            state.phase = Phase::Done;
        }
    }
    rt.close_conn(conn_id, true);
}

/// Bytes from a backend connection: forward raw to the owning client.
pub fn on_backend_data(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, data: Bytes) {
    rt.shared.counters.add_in(data.len() as u64);
    let cfg = proxy_cfg(rt);
    let now = ctx.now();
    let (client, backend) = match rt.conns.get_mut(&conn_id) {
        Some(conn) => {
            conn.touch(now);
            match conn.role {
                ConnRole::ProxyBackend { client, backend } => (client, backend),
                // Pooled connections have no business sending bytes.
                _ => {
                    conn.begin_close(false);
                    return;
                }
            }
        }
        None => return,
    };

    let first_byte = {
        match rt.conns.get_mut(&client) {
            Some(conn) => match &mut conn.role {
                ConnRole::ProxyClient(state) => {
                    let first = !state.response_started;
                    state.response_started = true;
                    state.saved_request = None;
                    first
                }
                _ => false,
            },
            None => false,
        }
    };
    if first_byte {
        if let KindState::Proxy(proxy) = &mut rt.kind {
            if let Some(slot) = proxy.backends.get_mut(backend) {
                slot.circuit.record_success();
                slot.health.record_probe(true, cfg.health_threshold);
            }
        }
        rt.shared.counters.message();
    }
    rt.send_raw(client, data);
}

/// A connection fully released (both halves reported).
pub fn on_conn_released(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    conn_id: ConnId,
    role: ConnRole,
) {
    let cfg = proxy_cfg(rt);
    match role {
        ConnRole::ProxyClient(state) => match state.phase {
            Phase::Piping { backend, backend_conn } => {
                maybe_pool(ctx, rt, backend_conn, backend, state.response_started, &cfg);
            }
            _ => {}
        },
        ConnRole::ProxyBackend { client, backend } => {
            let client_alive =
                rt.conns.get(&client).map(|conn| !conn.closing).unwrap_or(false);
            if client_alive {
                let response_started = matches!(
                    rt.conns.get(&client).map(|c| &c.role),
                    Some(ConnRole::ProxyClient(state)) if state.response_started
                );
                if response_started {
                    // Response complete (or severed mid-stream): mirror the
                    // close to the client.
                    rt.close_conn(client, true);
                } else {
                    record_backend_failure(ctx, rt, backend, &cfg);
                    retry_or_fail(ctx, rt, client, &cfg);
                }
            }
        }
        ConnRole::PooledBackend { backend, .. } => {
            if let KindState::Proxy(proxy) = &mut rt.kind {
                if let Some(idle) = proxy.pool.get_mut(&backend) {
                    idle.retain(|id| *id != conn_id);
                }
            }
        }
        _ => {}
    }
}

/// Retain a served backend connection for reuse, respecting the pool cap.
fn maybe_pool(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    backend_conn: ConnId,
    backend: usize,
    served: bool,
    cfg: &ProxyConfig,
) {
    let now = ctx.now();
    let eligible = served
        && cfg.pool_size > 0
        && rt.conns.get(&backend_conn).map(|conn| !conn.closing).unwrap_or(false);
    let has_room = match &rt.kind {
        KindState::Proxy(proxy) => {
            proxy.pool.get(&backend).map(|idle| idle.len()).unwrap_or(0) < cfg.pool_size
        }
        _ => false,
    };
    if eligible && has_room {
        if let Some(conn) = rt.conns.get_mut(&backend_conn) {
            conn.role = ConnRole::PooledBackend { backend, since: now };
        }
        if let KindState::Proxy(proxy) = &mut rt.kind {
            proxy.pool.entry(backend).or_default().push(backend_conn);
        }
    } else {
        rt.close_conn(backend_conn, true);
    }
}

/// Submit a health probe for every backend. Entries that cannot resolve
/// count as failed probes.
pub fn probe_all(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    let cfg = proxy_cfg(rt);
    let entries: Vec<(usize, String)> = match &rt.kind {
        KindState::Proxy(proxy) => proxy
            .backends
            .iter()
            .enumerate()
            .map(|(index, backend)| (index, backend.entry.clone()))
            .collect(),
        _ => return,
    };
    for (index, entry) in entries {
        match balance::resolve_entry(&ctx.registry, &entry) {
            Some(addr) => io::spawn_probe(
                ctx.events_tx.clone(),
                rt.id(),
                index,
                addr,
                cfg.health_path.clone(),
                rt.cancel.child_token(),
            ),
            None => {
                if let KindState::Proxy(proxy) = &mut rt.kind {
                    if let Some(slot) = proxy.backends.get_mut(index) {
                        slot.health.record_probe(false, cfg.health_threshold);
                    }
                }
            }
        }
    }
}

/// Health tick: probe every backend, then rearm the timer.
pub fn on_health_tick(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    let interval = proxy_cfg(rt).health_interval_secs;
    probe_all(ctx, rt);
    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::HealthTick,
        Duration::from_secs(interval.max(1)),
        rt.cancel.child_token(),
    );
}

/// Probe completion.
pub fn on_probe(rt: &mut LiveRuntime, backend: usize, healthy: bool) {
    let threshold = proxy_cfg(rt).health_threshold;
    if let KindState::Proxy(proxy) = &mut rt.kind {
        if let Some(slot) = proxy.backends.get_mut(backend) {
            slot.health.record_probe(healthy, threshold);
            if !healthy {
                debug!(backend, fails = slot.health.consecutive_failures, "health probe failed");
            }
        }
    }
}

/// Pool sweep: close pooled connections idle past the limit, then rearm.
pub fn on_pool_sweep(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    let cfg = proxy_cfg(rt);
    let now = ctx.now();
    let limit = Duration::from_secs(cfg.pool_idle_secs.max(1));
    let stale: Vec<ConnId> = rt
        .conns
        .values()
        .filter(|conn| match conn.role {
            ConnRole::PooledBackend { since, .. } => now.saturating_duration_since(since) >= limit,
            _ => false,
        })
        .map(|conn| conn.id)
        .collect();
    for conn_id in stale {
        rt.close_conn(conn_id, true);
    }
    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::PoolSweep,
        limit,
        rt.cancel.child_token(),
    );
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
