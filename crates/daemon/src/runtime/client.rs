// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client engine: one outbound connection with exponential-backoff
//! reconnect, line or datagram transport.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use socketley_core::runtime::PARTIAL_BUFFER_CAP;
use socketley_core::{KindConfig, RuntimeState, Transport};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::engine::conn::ConnRole;
use crate::engine::event::{ConnId, ConnectTarget, TimerKind};
use crate::engine::{io, EngineCtx};
use crate::hooks::HookCtx;
use crate::runtime::{KindState, LiveRuntime};

#[derive(Default)]
pub struct ClientState {
    pub conn: Option<ConnId>,
    pub attempts: u32,
    /// Resolved address per `host:port`, invalidated on connect failure.
    pub resolve_cache: HashMap<String, SocketAddr>,
    pub udp: Option<Arc<UdpSocket>>,
}

/// Reconnect backoff: `min(2^min(attempt,4), 30)` seconds plus 0–499 ms
/// of jitter so a restarted target is not thundered.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = (1u64 << attempt.min(4)).min(30);
    let jitter = rand::thread_rng().gen_range(0..500u64);
    Duration::from_secs(secs) + Duration::from_millis(jitter)
}

fn target_of(rt: &LiveRuntime) -> (Transport, String) {
    match &rt.cfg.kind {
        KindConfig::Client(c) => (c.transport, c.target.clone()),
        _ => (Transport::Tcp, String::new()),
    }
}

/// Engine setup: submit the first connect (TCP) or bind the datagram
/// socket (UDP).
pub fn setup(ctx: &mut EngineCtx, rt: &mut LiveRuntime) -> Result<(), String> {
    let (transport, target) = target_of(rt);
    if target.is_empty() {
        return Err("client has no target (edit <name> target=host:port)".to_string());
    }
    match transport {
        Transport::Tcp => {
            submit_connect(ctx, rt, &target);
            Ok(())
        }
        Transport::Udp => {
            let socket = io::bind_udp(0).map_err(|e| format!("udp bind failed: {}", e))?;
            // Resolve once up front; invalidated with the cache on errors.
            let addr = std::net::ToSocketAddrs::to_socket_addrs(&target)
                .map_err(|e| format!("cannot resolve {}: {}", target, e))?
                .next()
                .ok_or_else(|| format!("no address for {}", target))?;
            let socket = Arc::new(socket);
            io::spawn_udp_recv(
                Arc::clone(&socket),
                ctx.events_tx.clone(),
                rt.id(),
                rt.cancel.child_token(),
            );
            if let KindState::Client(state) = &mut rt.kind {
                state.udp = Some(socket);
                state.resolve_cache.insert(target, addr);
            }
            Ok(())
        }
    }
}

fn submit_connect(ctx: &mut EngineCtx, rt: &mut LiveRuntime, target: &str) {
    let cached = match &rt.kind {
        KindState::Client(state) => state.resolve_cache.get(target).copied(),
        _ => None,
    };
    io::spawn_connect(
        ctx.events_tx.clone(),
        rt.id(),
        ConnectTarget::ClientMain,
        target.to_string(),
        cached,
        rt.cancel.child_token(),
    );
}

/// `Connected` completion for the main connection.
pub fn on_connected(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    result: Result<tokio::net::TcpStream, std::io::Error>,
    resolved: Option<SocketAddr>,
) {
    let (_, target) = target_of(rt);
    match result {
        Ok(stream) => {
            let conn_id = ctx.register_stream(rt, stream, None, ConnRole::ClientMain);
            if let KindState::Client(state) = &mut rt.kind {
                state.conn = Some(conn_id);
                state.attempts = 0;
                if let Some(addr) = resolved {
                    state.resolve_cache.insert(target, addr);
                }
            }
            info!(runtime = %rt.name(), "connected");
            let hook_ctx = HookCtx { runtime: rt.name(), peer: resolved };
            if let Some(hooks) = ctx.hooks.get(&rt.name()) {
                if let Some(on_connect) = &hooks.on_connect {
                    on_connect(&hook_ctx);
                }
            }
            rt.mirror("connected");
        }
        Err(error) => {
            debug!(runtime = %rt.name(), %error, "connect failed");
            if let KindState::Client(state) = &mut rt.kind {
                state.resolve_cache.remove(&target);
            }
            schedule_reconnect(ctx, rt);
        }
    }
}

/// Schedule the next attempt, or fail the runtime when the policy is
/// exhausted. Attempts count up; a ceiling of 0 means unlimited.
pub fn schedule_reconnect(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    if rt.shared.state() != RuntimeState::Running {
        return;
    }
    let name = rt.name();
    let (reconnect, ceiling) = (rt.cfg.reconnect, rt.cfg.max_reconnects);
    let next_attempt = match &mut rt.kind {
        KindState::Client(state) => {
            if !reconnect || (ceiling != 0 && state.attempts >= ceiling) {
                None
            } else {
                state.attempts += 1;
                Some(state.attempts)
            }
        }
        _ => return,
    };
    match next_attempt {
        None => {
            warn!(runtime = %name, "reconnect policy exhausted");
            rt.shared.set_state(RuntimeState::Failed);
            rt.mirror("reconnect policy exhausted");
        }
        Some(attempt) => {
            let delay = backoff_delay(attempt);
            debug!(runtime = %name, attempt, ?delay, "scheduling reconnect");
            io::spawn_timer(
                ctx.events_tx.clone(),
                Some(rt.id()),
                TimerKind::Reconnect,
                delay,
                rt.cancel.child_token(),
            );
        }
    }
}

/// `action reconnect`: drop the backoff state and connect immediately.
pub fn reconnect_now(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    if let KindState::Client(state) = &mut rt.kind {
        state.attempts = 0;
    }
    let (_, target) = target_of(rt);
    if !target.is_empty() {
        submit_connect(ctx, rt, &target);
    }
}

/// Reconnect timeout completion: rebuild the socket and retry.
pub fn on_reconnect_timer(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    if rt.shared.state() != RuntimeState::Running {
        return;
    }
    let (_, target) = target_of(rt);
    submit_connect(ctx, rt, &target);
}

/// Bytes received on the main connection: line-split and deliver.
pub fn on_data(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, data: bytes::Bytes) {
    rt.shared.counters.add_in(data.len() as u64);
    let now = ctx.now();
    let overflow = match rt.conns.get_mut(&conn_id) {
        Some(conn) => {
            conn.touch(now);
            conn.acc.extend_from_slice(&data);
            conn.acc.len() > PARTIAL_BUFFER_CAP
        }
        None => return,
    };
    if overflow {
        warn!(runtime = %rt.name(), "partial buffer cap exceeded, closing");
        rt.close_conn(conn_id, false);
        return;
    }
    for line in drain_lines(&mut rt.conns, conn_id) {
        deliver(ctx, rt, &line);
    }
}

/// Datagram received (UDP transport): one datagram, one message.
pub fn on_datagram(ctx: &mut EngineCtx, rt: &mut LiveRuntime, data: bytes::Bytes) {
    rt.shared.counters.add_in(data.len() as u64);
    let text = String::from_utf8_lossy(&data).trim_end_matches('\n').to_string();
    deliver(ctx, rt, &text);
}

fn deliver(ctx: &mut EngineCtx, rt: &mut LiveRuntime, line: &str) {
    rt.shared.counters.message();
    let hook_ctx = HookCtx { runtime: rt.name(), peer: None };
    let rewritten = ctx
        .hooks
        .get(&rt.name())
        .and_then(|hooks| hooks.on_message.as_ref())
        .and_then(|hook| hook(&hook_ctx, line));
    let line = rewritten.as_deref().unwrap_or(line);
    rt.log_message(line);
    rt.mirror(line);
}

/// Send one payload toward the target. Line mode appends the missing LF;
/// datagram mode sends exactly one datagram with no framing.
pub fn send(rt: &mut LiveRuntime, text: &str) -> Result<(), String> {
    let (transport, target) = target_of(rt);
    match transport {
        Transport::Tcp => {
            let conn = match &rt.kind {
                KindState::Client(state) => state.conn,
                _ => None,
            };
            let Some(conn_id) = conn else {
                return Err("not connected".to_string());
            };
            rt.send_text(conn_id, text);
            Ok(())
        }
        Transport::Udp => {
            let KindState::Client(state) = &rt.kind else {
                return Err("not a client".to_string());
            };
            let Some(socket) = &state.udp else {
                return Err("not connected".to_string());
            };
            let Some(addr) = state.resolve_cache.get(&target) else {
                return Err("target unresolved".to_string());
            };
            match socket.try_send_to(text.as_bytes(), *addr) {
                Ok(sent) => {
                    rt.shared.counters.add_out(sent as u64);
                    Ok(())
                }
                Err(error) => Err(format!("send failed: {}", error)),
            }
        }
    }
}

/// Both halves of the main connection have reported; reconnect per policy.
pub fn on_conn_released(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId) {
    let was_main = match &mut rt.kind {
        KindState::Client(state) if state.conn == Some(conn_id) => {
            state.conn = None;
            true
        }
        _ => false,
    };
    if was_main {
        rt.mirror("disconnected");
        schedule_reconnect(ctx, rt);
    }
}

/// Split completed lines out of a connection accumulator. CR trimmed,
/// empty lines skipped.
pub fn drain_lines(
    conns: &mut HashMap<ConnId, crate::engine::conn::Connection>,
    conn_id: ConnId,
) -> Vec<String> {
    let Some(conn) = conns.get_mut(&conn_id) else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    while let Some(pos) = conn.acc.iter().position(|b| *b == b'\n') {
        let line = conn.acc.split_to(pos + 1);
        let mut raw = &line[..line.len() - 1];
        if raw.last() == Some(&b'\r') {
            raw = &raw[..raw.len() - 1];
        }
        if !raw.is_empty() {
            lines.push(String::from_utf8_lossy(raw).into_owned());
        }
    }
    lines
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
