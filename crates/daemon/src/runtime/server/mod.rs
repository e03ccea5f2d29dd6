// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server engine: TCP/UDP listeners, per-connection protocol
//! auto-detection (line / WebSocket / HTTP), message dispatch modes,
//! master authentication, linked caches and upstream links.

pub mod httpd;
pub mod ws;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use socketley_core::runtime::{PARTIAL_BUFFER_CAP, UDP_PEER_CAP};
use socketley_core::{KindConfig, ServerConfig, ServerMode, Transport};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::engine::conn::{ConnRole, Proto, WsHandshake};
use crate::engine::event::{ConnId, ConnectTarget, TimerKind};
use crate::engine::{io, EngineCtx, InternalMsg};
use crate::hooks::HookCtx;
use crate::runtime::{client, KindState, LiveRuntime};

/// Master-auth limits: per-connection failures before close, per-IP
/// failures per window before new connections are rejected.
const CONN_AUTH_LIMIT: u32 = 5;
const IP_AUTH_LIMIT: u32 = 10;
const IP_AUTH_WINDOW: Duration = Duration::from_secs(60);

/// One outbound upstream link.
pub struct UpstreamState {
    pub target: String,
    pub conn: Option<ConnId>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct IpWindow {
    pub count: u32,
    pub since: Instant,
}

/// Live server state.
#[derive(Default)]
pub struct ServerState {
    pub udp: Option<Arc<UdpSocket>>,
    /// Every datagram source seen, bounded by [`UDP_PEER_CAP`].
    pub udp_peers: HashMap<SocketAddr, Instant>,
    pub master: Option<ConnId>,
    pub ip_failures: HashMap<IpAddr, IpWindow>,
    /// Monotonic key for the store-to-cache path.
    pub store_seq: u64,
    pub site: httpd::StaticSite,
    pub upstreams: Vec<UpstreamState>,
}

fn server_cfg(rt: &LiveRuntime) -> ServerConfig {
    match &rt.cfg.kind {
        KindConfig::Server(s) => s.clone(),
        _ => ServerConfig::default(),
    }
}

/// Engine setup: bind the listener, build the static site, link upstreams.
pub fn setup(ctx: &mut EngineCtx, rt: &mut LiveRuntime) -> Result<(), String> {
    if rt.cfg.port == 0 {
        return Err("server has no port (edit <name> port=<n>)".to_string());
    }
    let cfg = server_cfg(rt);

    match cfg.transport {
        Transport::Tcp => {
            let listener = io::listen_tcp(rt.cfg.port)
                .map_err(|e| format!("bind {} failed: {}", rt.cfg.port, e))?;
            io::spawn_accept(listener, ctx.events_tx.clone(), rt.id(), rt.cancel.child_token());
        }
        Transport::Udp => {
            let socket = io::bind_udp(rt.cfg.port)
                .map_err(|e| format!("bind {} failed: {}", rt.cfg.port, e))?;
            let socket = Arc::new(socket);
            io::spawn_udp_recv(
                Arc::clone(&socket),
                ctx.events_tx.clone(),
                rt.id(),
                rt.cancel.child_token(),
            );
            if let KindState::Server(state) = &mut rt.kind {
                state.udp = Some(socket);
            }
        }
    }

    let site = cfg
        .static_dir
        .as_ref()
        .map(|dir| httpd::StaticSite::build(dir, cfg.static_cache))
        .unwrap_or_default();
    let upstreams: Vec<UpstreamState> = cfg
        .upstreams
        .iter()
        .map(|target| UpstreamState { target: target.clone(), conn: None, attempts: 0 })
        .collect();
    if let KindState::Server(state) = &mut rt.kind {
        state.site = site;
        state.upstreams = upstreams;
    }
    for index in 0..cfg.upstreams.len() {
        submit_upstream_connect(ctx, rt, index);
    }
    Ok(())
}

fn submit_upstream_connect(ctx: &mut EngineCtx, rt: &mut LiveRuntime, index: usize) {
    let target = match &rt.kind {
        KindState::Server(state) => state.upstreams.get(index).map(|u| u.target.clone()),
        _ => None,
    };
    if let Some(target) = target {
        io::spawn_connect(
            ctx.events_tx.clone(),
            rt.id(),
            ConnectTarget::Upstream(index),
            target,
            None,
            rt.cancel.child_token(),
        );
    }
}

/// Accepted TCP connection: ceiling, per-IP ban, auth hook, then register.
pub fn on_accepted(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
) {
    if rt.conns.len() >= rt.cfg.max_connections {
        debug!(runtime = %rt.name(), "max connections reached, rejecting");
        return;
    }
    let now = ctx.now();
    let banned = match &rt.kind {
        KindState::Server(state) => state
            .ip_failures
            .get(&peer.ip())
            .map(|window| {
                window.count >= IP_AUTH_LIMIT
                    && now.saturating_duration_since(window.since) <= IP_AUTH_WINDOW
            })
            .unwrap_or(false),
        _ => false,
    };
    if banned {
        debug!(runtime = %rt.name(), %peer, "rejecting banned source");
        return;
    }

    let hook_ctx = HookCtx { runtime: rt.name(), peer: Some(peer) };
    if let Some(hooks) = ctx.hooks.get(&rt.name()) {
        if let Some(on_auth) = &hooks.on_auth {
            if !on_auth(&hook_ctx) {
                debug!(runtime = %rt.name(), %peer, "auth hook rejected connection");
                return;
            }
        }
        if let Some(on_connect) = &hooks.on_connect {
            on_connect(&hook_ctx);
        }
    }
    ctx.register_stream(rt, stream, Some(peer), ConnRole::Peer);
}

/// Bytes on an accepted or upstream connection.
pub fn on_data(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, data: Bytes) {
    rt.shared.counters.add_in(data.len() as u64);
    let now = ctx.now();

    let (overflow, is_upstream) = {
        let Some(conn) = rt.conns.get_mut(&conn_id) else {
            return;
        };
        conn.touch(now);
        conn.acc.extend_from_slice(&data);
        (conn.acc.len() > PARTIAL_BUFFER_CAP, matches!(conn.role, ConnRole::Upstream(_)))
    };
    if overflow {
        warn!(runtime = %rt.name(), conn = %conn_id, "partial buffer cap exceeded, closing");
        rt.close_conn(conn_id, false);
        return;
    }

    if is_upstream {
        for line in client::drain_lines(&mut rt.conns, conn_id) {
            on_upstream_message(ctx, rt, &line);
        }
        return;
    }

    detect_protocol(rt, conn_id);
    match rt.conns.get(&conn_id).map(|c| c.proto) {
        Some(Proto::HttpUpgrading) => handle_http_upgrading(ctx, rt, conn_id),
        Some(Proto::WsActive) => handle_ws_frames(ctx, rt, conn_id),
        Some(Proto::Line) => {
            for line in client::drain_lines(&mut rt.conns, conn_id) {
                handle_message(ctx, rt, conn_id, &line);
            }
        }
        _ => {}
    }
}

/// Runs once per connection: `GET ` means HTTP; anything else is line
/// mode. (RESP detection belongs to cache runtimes.)
fn detect_protocol(rt: &mut LiveRuntime, conn_id: ConnId) {
    let Some(conn) = rt.conns.get_mut(&conn_id) else {
        return;
    };
    if conn.proto != Proto::Unknown || conn.acc.is_empty() {
        return;
    }
    if conn.acc.len() < 4 && b"GET ".starts_with(&conn.acc[..conn.acc.len().min(4)]) {
        // Could still become "GET "; wait for the fourth byte.
        return;
    }
    conn.proto = if conn.acc.starts_with(b"GET ") { Proto::HttpUpgrading } else { Proto::Line };
}

/// Collecting an HTTP head: upgrade to WebSocket, serve a static file,
/// or fall back to raw TCP.
fn handle_http_upgrading(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId) {
    enum Upgrade {
        Wait,
        Ws { key: String, handshake: WsHandshake, head_len: usize },
        Static { path: String },
        Bad,
    }

    let decision = {
        let Some(conn) = rt.conns.get_mut(&conn_id) else {
            return;
        };
        match crate::http::parse_head(&conn.acc) {
            None => Upgrade::Wait,
            Some(Err(())) => Upgrade::Bad,
            Some(Ok(head)) => {
                if head.is_websocket_upgrade() {
                    match head.header("sec-websocket-key") {
                        Some(key) => Upgrade::Ws {
                            key: key.to_string(),
                            handshake: WsHandshake {
                                cookie: head.header("cookie").map(String::from),
                                origin: head.header("origin").map(String::from),
                                protocol: head
                                    .header("sec-websocket-protocol")
                                    .map(String::from),
                                authorization: head.header("authorization").map(String::from),
                            },
                            head_len: head.head_len,
                        },
                        None => Upgrade::Bad,
                    }
                } else {
                    Upgrade::Static { path: head.path }
                }
            }
        }
    };

    match decision {
        Upgrade::Wait => {}
        Upgrade::Bad => {
            rt.send_raw(conn_id, Bytes::from(crate::http::bad_request()));
            rt.close_conn(conn_id, true);
        }
        Upgrade::Ws { key, handshake, head_len } => {
            if let Some(conn) = rt.conns.get_mut(&conn_id) {
                let _ = conn.acc.split_to(head_len);
                conn.ws = Some(handshake);
                conn.proto = Proto::WsActive;
            }
            rt.send_raw(conn_id, Bytes::from(ws::handshake_response(&key)));
            info!(runtime = %rt.name(), conn = %conn_id, "websocket established");
            // Bytes after the handshake may already hold frames.
            handle_ws_frames(ctx, rt, conn_id);
        }
        Upgrade::Static { path } => {
            let served = match &rt.kind {
                KindState::Server(state) if state.site.enabled() => {
                    Some(state.site.serve(&path))
                }
                _ => None,
            };
            match served {
                Some(response) => {
                    rt.send_raw(conn_id, response);
                    rt.close_conn(conn_id, true);
                }
                None => {
                    // No static dir: treat the bytes as raw TCP lines.
                    if let Some(conn) = rt.conns.get_mut(&conn_id) {
                        conn.proto = Proto::Line;
                    }
                    for line in client::drain_lines(&mut rt.conns, conn_id) {
                        handle_message(ctx, rt, conn_id, &line);
                    }
                }
            }
        }
    }
}

/// Parse frames out of the accumulator and dispatch the resulting events.
fn handle_ws_frames(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId) {
    loop {
        enum FrameStep {
            Message(String),
            Pong(Vec<u8>),
            Close,
            Protocol,
            Wait,
        }
        let step = {
            let Some(conn) = rt.conns.get_mut(&conn_id) else {
                return;
            };
            match ws::parse_frame(&conn.acc, PARTIAL_BUFFER_CAP) {
                None => FrameStep::Wait,
                Some(Err(_)) => FrameStep::Protocol,
                Some(Ok((frame, consumed))) => {
                    let _ = conn.acc.split_to(consumed);
                    match conn.ws_frames.push(frame, PARTIAL_BUFFER_CAP) {
                        Err(_) => FrameStep::Protocol,
                        Ok(None) => continue,
                        Ok(Some(ws::WsEvent::Message(text))) => FrameStep::Message(text),
                        Ok(Some(ws::WsEvent::Ping(payload))) => FrameStep::Pong(payload),
                        Ok(Some(ws::WsEvent::Pong)) => continue,
                        Ok(Some(ws::WsEvent::Close)) => FrameStep::Close,
                    }
                }
            }
        };
        match step {
            FrameStep::Wait => return,
            FrameStep::Protocol => {
                debug!(runtime = %rt.name(), conn = %conn_id, "websocket protocol error");
                rt.close_conn(conn_id, false);
                return;
            }
            FrameStep::Message(text) => handle_message(ctx, rt, conn_id, &text),
            FrameStep::Pong(payload) => {
                rt.send_raw(conn_id, Bytes::from(ws::build_frame(ws::OP_PONG, &payload)));
            }
            FrameStep::Close => {
                rt.send_raw(conn_id, Bytes::from(ws::build_frame(ws::OP_CLOSE, &[])));
                rt.close_conn(conn_id, true);
                return;
            }
        }
    }
}

/// One application message from a connection (line or WS text).
pub fn handle_message(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, text: &str) {
    let cfg = server_cfg(rt);
    let now = ctx.now();
    rt.shared.counters.message();

    // Rate ceilings: per-connection first, then global.
    let allowed = rt
        .conns
        .get_mut(&conn_id)
        .map(|conn| conn.bucket.allow(now))
        .unwrap_or(false)
        && rt.global_bucket.allow(now);
    if !allowed {
        debug!(runtime = %rt.name(), conn = %conn_id, "rate limited, dropping message");
        return;
    }

    if cfg.mode == ServerMode::Out {
        return;
    }

    // Routed connections forward to the sub-server instead of local
    // processing; the lookup cycle is by name, never by pointer.
    let route = rt
        .conns
        .get(&conn_id)
        .and_then(|conn| conn.meta.get("route").cloned())
        .or_else(|| cfg.route_to.clone());
    if let Some(target) = route {
        ctx.pending.push_back(InternalMsg::Deliver {
            target,
            text: text.to_string(),
            hops: 0,
        });
        return;
    }

    // Master authentication handshake.
    if let Some(secret) = text.strip_prefix("master ") {
        master_auth(ctx, rt, conn_id, secret, &cfg);
        return;
    }

    // Message hook may rewrite or observe.
    let hook_ctx = HookCtx {
        runtime: rt.name(),
        peer: rt.conns.get(&conn_id).and_then(|c| c.peer),
    };
    let rewritten = ctx
        .hooks
        .get(&rt.name())
        .and_then(|hooks| hooks.on_message.as_ref())
        .and_then(|hook| hook(&hook_ctx, text));
    let text = rewritten.as_deref().unwrap_or(text);

    // Linked-cache command: execute and reply to the sender only.
    if let Some(rest) = text.strip_prefix("cache ") {
        if let Some(cache) = cfg.linked_cache.clone() {
            ctx.pending.push_back(InternalMsg::CacheExec {
                cache,
                line: rest.to_string(),
                reply_to: Some((rt.id(), conn_id)),
            });
            return;
        }
    }

    // Store-to-cache with a monotonically increasing key.
    if let Some(store) = cfg.store_cache.clone() {
        let seq = match &mut rt.kind {
            KindState::Server(state) => {
                state.store_seq += 1;
                state.store_seq
            }
            _ => 0,
        };
        ctx.pending.push_back(InternalMsg::CacheStore {
            cache: store,
            key: format!("{}:{}", rt.name(), seq),
            value: text.to_string(),
        });
    }

    rt.log_message(text);
    rt.mirror(text);

    match cfg.mode {
        ServerMode::Inout => rt.broadcast(text, Some(conn_id)),
        ServerMode::In => {}
        ServerMode::Out => {}
        ServerMode::Master => {
            let is_master = rt.conns.get(&conn_id).map(|c| c.authed_master).unwrap_or(false);
            if is_master {
                rt.broadcast(text, Some(conn_id));
            } else if cfg.forward_to_master {
                let master = match &rt.kind {
                    KindState::Server(state) => state.master,
                    _ => None,
                };
                if let Some(master) = master.filter(|m| *m != conn_id) {
                    rt.send_text(master, text);
                }
            }
            // Otherwise non-master messages are dropped.
        }
    }
}

/// `master <secret>`: constant-time comparison, failure counters per
/// connection and per source IP.
fn master_auth(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    conn_id: ConnId,
    attempt: &str,
    cfg: &ServerConfig,
) {
    let hook_ctx = HookCtx {
        runtime: rt.name(),
        peer: rt.conns.get(&conn_id).and_then(|c| c.peer),
    };
    let ok = match &cfg.master_secret {
        Some(secret) => constant_time_eq(secret.as_bytes(), attempt.as_bytes()),
        None => ctx
            .hooks
            .get(&rt.name())
            .and_then(|hooks| hooks.on_master_check.as_ref())
            .map(|hook| hook(&hook_ctx, attempt))
            .unwrap_or(false),
    };

    if ok {
        if let Some(conn) = rt.conns.get_mut(&conn_id) {
            conn.authed_master = true;
            conn.auth_failures = 0;
        }
        if let KindState::Server(state) = &mut rt.kind {
            state.master = Some(conn_id);
        }
        info!(runtime = %rt.name(), conn = %conn_id, "master authenticated");
        rt.send_text(conn_id, "master ok");
        return;
    }

    let now = ctx.now();
    let peer_ip = rt.conns.get(&conn_id).and_then(|c| c.peer).map(|p| p.ip());
    let failures = match rt.conns.get_mut(&conn_id) {
        Some(conn) => {
            conn.auth_failures += 1;
            conn.auth_failures
        }
        None => return,
    };
    if let (Some(ip), KindState::Server(state)) = (peer_ip, &mut rt.kind) {
        let window = state.ip_failures.entry(ip).or_insert(IpWindow { count: 0, since: now });
        if now.saturating_duration_since(window.since) > IP_AUTH_WINDOW {
            *window = IpWindow { count: 0, since: now };
        }
        window.count += 1;
    }
    warn!(runtime = %rt.name(), conn = %conn_id, failures, "master auth failed");
    if failures >= CONN_AUTH_LIMIT {
        rt.close_conn(conn_id, false);
    } else {
        rt.send_text(conn_id, "master denied");
    }
}

/// Constant-time byte comparison; length differences still take the full
/// scan.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    let max = a.len().max(b.len());
    for index in 0..max {
        let x = a.get(index).copied().unwrap_or(0);
        let y = b.get(index).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Datagram on a UDP server: one datagram, one message, peers tracked.
pub fn on_datagram(ctx: &mut EngineCtx, rt: &mut LiveRuntime, peer: SocketAddr, data: Bytes) {
    rt.shared.counters.add_in(data.len() as u64);
    let now = ctx.now();
    let cfg = server_cfg(rt);

    if let KindState::Server(state) = &mut rt.kind {
        if state.udp_peers.contains_key(&peer) || state.udp_peers.len() < UDP_PEER_CAP {
            if state.udp_peers.insert(peer, now).is_none() {
                rt.shared.counters.connection_opened();
            }
        }
    }

    let text = String::from_utf8_lossy(&data);
    let text = text.trim_end_matches(['\n', '\r']);
    if text.is_empty() {
        return;
    }
    rt.shared.counters.message();
    if !rt.global_bucket.allow(now) {
        return;
    }
    if cfg.mode == ServerMode::Out {
        return;
    }

    let hook_ctx = HookCtx { runtime: rt.name(), peer: Some(peer) };
    let rewritten = ctx
        .hooks
        .get(&rt.name())
        .and_then(|hooks| hooks.on_message.as_ref())
        .and_then(|hook| hook(&hook_ctx, text));
    let text = rewritten.as_deref().unwrap_or(text);

    rt.log_message(text);
    rt.mirror(text);

    if cfg.mode == ServerMode::Inout {
        broadcast_udp(rt, text, Some(peer));
    }
}

/// One sendto per peer, non-blocking; no framing beyond the datagram.
pub fn broadcast_udp(rt: &mut LiveRuntime, text: &str, except: Option<SocketAddr>) {
    let KindState::Server(state) = &mut rt.kind else {
        return;
    };
    let Some(socket) = &state.udp else {
        return;
    };
    let mut sent_bytes = 0u64;
    for peer in state.udp_peers.keys() {
        if Some(*peer) == except {
            continue;
        }
        if let Ok(sent) = socket.try_send_to(text.as_bytes(), *peer) {
            sent_bytes += sent as u64;
        }
    }
    rt.shared.counters.add_out(sent_bytes);
}

/// Control-channel or session input: broadcast to everyone.
pub fn inject(rt: &mut LiveRuntime, text: &str) {
    rt.log_message(text);
    rt.broadcast(text, None);
    broadcast_udp(rt, text, None);
}

/// Upstream connect completion.
pub fn on_upstream_connected(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    index: usize,
    result: Result<tokio::net::TcpStream, std::io::Error>,
) {
    match result {
        Ok(stream) => {
            let conn_id = ctx.register_stream(rt, stream, None, ConnRole::Upstream(index));
            if let Some(conn) = rt.conns.get_mut(&conn_id) {
                conn.proto = Proto::Line;
            }
            if let KindState::Server(state) = &mut rt.kind {
                if let Some(upstream) = state.upstreams.get_mut(index) {
                    upstream.conn = Some(conn_id);
                    upstream.attempts = 0;
                }
            }
            info!(runtime = %rt.name(), index, "upstream connected");
        }
        Err(error) => {
            debug!(runtime = %rt.name(), index, %error, "upstream connect failed");
            schedule_upstream_reconnect(ctx, rt, index);
        }
    }
}

fn schedule_upstream_reconnect(ctx: &mut EngineCtx, rt: &mut LiveRuntime, index: usize) {
    if rt.shared.state() != socketley_core::RuntimeState::Running || !rt.cfg.reconnect {
        return;
    }
    let attempt = match &mut rt.kind {
        KindState::Server(state) => match state.upstreams.get_mut(index) {
            Some(upstream) => {
                upstream.attempts += 1;
                upstream.attempts
            }
            None => return,
        },
        _ => return,
    };
    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::UpstreamReconnect(index),
        client::backoff_delay(attempt),
        rt.cancel.child_token(),
    );
}

/// Upstream reconnect timer fired.
pub fn on_upstream_timer(ctx: &mut EngineCtx, rt: &mut LiveRuntime, index: usize) {
    if rt.shared.state() == socketley_core::RuntimeState::Running {
        submit_upstream_connect(ctx, rt, index);
    }
}

/// Upstream receive dispatches to the message hook, not to local clients.
fn on_upstream_message(ctx: &mut EngineCtx, rt: &mut LiveRuntime, text: &str) {
    rt.shared.counters.message();
    let hook_ctx = HookCtx { runtime: rt.name(), peer: None };
    if let Some(hooks) = ctx.hooks.get(&rt.name()) {
        if let Some(on_message) = &hooks.on_message {
            let _ = on_message(&hook_ctx, text);
        }
    }
    rt.log_message(text);
    rt.mirror(text);
}

/// A connection fully released.
pub fn on_conn_released(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    conn_id: ConnId,
    role: &ConnRole,
) {
    match role {
        ConnRole::Upstream(index) => {
            if let KindState::Server(state) = &mut rt.kind {
                if let Some(upstream) = state.upstreams.get_mut(*index) {
                    upstream.conn = None;
                }
            }
            schedule_upstream_reconnect(ctx, rt, *index);
        }
        ConnRole::Peer => {
            let was_master = match &rt.kind {
                KindState::Server(state) => state.master == Some(conn_id),
                _ => false,
            };
            if was_master {
                if let KindState::Server(state) = &mut rt.kind {
                    state.master = None;
                }
            }
            let hook_ctx = HookCtx { runtime: rt.name(), peer: None };
            if let Some(hooks) = ctx.hooks.get(&rt.name()) {
                if let Some(on_disconnect) = &hooks.on_disconnect {
                    on_disconnect(&hook_ctx);
                }
            }
        }
        _ => {}
    }
}

/// Idle sweep: close connections whose last activity is beyond the
/// configured timeout, then rearm.
pub fn on_idle_sweep(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    let timeout = rt.cfg.idle_timeout_secs;
    if timeout == 0 {
        return;
    }
    let now = ctx.now();
    let limit = Duration::from_secs(timeout);
    let stale: Vec<ConnId> = rt
        .conns
        .values()
        .filter(|conn| {
            !conn.closing
                && matches!(conn.role, ConnRole::Peer)
                && now.saturating_duration_since(conn.last_activity) >= limit
        })
        .map(|conn| conn.id)
        .collect();
    for conn_id in stale {
        debug!(runtime = %rt.name(), conn = %conn_id, "closing idle connection");
        rt.close_conn(conn_id, true);
    }
    // Stale UDP peers age out of the table on the same sweep.
    if let KindState::Server(state) = &mut rt.kind {
        state.udp_peers.retain(|_, last| now.saturating_duration_since(*last) < limit);
    }
    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::IdleSweep,
        limit.min(Duration::from_secs(10)).max(Duration::from_secs(1)),
        rt.cancel.child_token(),
    );
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
