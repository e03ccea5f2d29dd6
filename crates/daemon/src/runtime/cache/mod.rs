// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache engine: multi-type keyspace behind the line and RESP protocols,
//! pub/sub, snapshots, and leader→follower replication.

pub mod exec;
pub mod resp;
pub mod snapshot;
pub mod store;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use socketley_core::runtime::PARTIAL_BUFFER_CAP;
use socketley_core::{AccessMode, CacheConfig, KindConfig, RuntimeState};
use tracing::{debug, info, warn};

use crate::engine::conn::{ConnRole, Proto};
use crate::engine::event::{ConnId, ConnectTarget, TimerKind};
use crate::engine::{io, EngineCtx};
use crate::runtime::{client, KindState, LiveRuntime};
use exec::{Exec, Reply};
use store::{Store, Value};

/// TTL sweep cadence and sample size.
const TTL_TICK: Duration = Duration::from_secs(1);
const TTL_SAMPLE: usize = 20;

/// Per-connection cache state.
#[derive(Debug, Default)]
pub struct CacheConnState {
    pub subscribed: HashSet<String>,
    pub replica: bool,
}

/// Live cache state.
pub struct CacheState {
    pub store: Store,
    /// channel → subscriber connections.
    pub channels: HashMap<String, HashSet<ConnId>>,
    pub replicas: HashSet<ConnId>,
    pub follower_conn: Option<ConnId>,
    pub follower_attempts: u32,
}

impl CacheState {
    pub fn new(cfg: &socketley_core::RuntimeConfig) -> Self {
        let cache = match &cfg.kind {
            KindConfig::Cache(c) => c.clone(),
            _ => CacheConfig::default(),
        };
        Self {
            store: Store::new(cache.max_memory, cache.eviction),
            channels: HashMap::new(),
            replicas: HashSet::new(),
            follower_conn: None,
            follower_attempts: 0,
        }
    }
}

fn cache_cfg(rt: &LiveRuntime) -> CacheConfig {
    match &rt.cfg.kind {
        KindConfig::Cache(c) => c.clone(),
        _ => CacheConfig::default(),
    }
}

/// Engine setup: implicit LOAD, listener, TTL tick, follower link.
pub fn setup(ctx: &mut EngineCtx, rt: &mut LiveRuntime) -> Result<(), String> {
    let cfg = cache_cfg(rt);

    if let Some(path) = &cfg.persist_path {
        if path.exists() {
            let now_ms = ctx.epoch_ms();
            match snapshot::load(path, now_ms) {
                Ok(entries) => {
                    let count = entries.len();
                    if let KindState::Cache(state) = &mut rt.kind {
                        state.store.clear();
                        for (key, value, expiry) in entries {
                            let _ = state.store.put(&key, value, expiry);
                        }
                    }
                    info!(runtime = %rt.name(), count, "loaded snapshot");
                }
                Err(error) => {
                    warn!(runtime = %rt.name(), %error, "snapshot load failed, starting empty")
                }
            }
        }
    }

    if rt.cfg.port != 0 {
        let listener = io::listen_tcp(rt.cfg.port)
            .map_err(|e| format!("bind {} failed: {}", rt.cfg.port, e))?;
        io::spawn_accept(listener, ctx.events_tx.clone(), rt.id(), rt.cancel.child_token());
    }

    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::TtlTick,
        TTL_TICK,
        rt.cancel.child_token(),
    );

    if let Some(leader) = &cfg.replicate_from {
        io::spawn_connect(
            ctx.events_tx.clone(),
            rt.id(),
            ConnectTarget::CacheFollower,
            leader.clone(),
            None,
            rt.cancel.child_token(),
        );
    }
    Ok(())
}

/// Accepted cache client.
pub fn on_accepted(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
) {
    ctx.register_stream(rt, stream, Some(peer), ConnRole::CacheClient(CacheConnState::default()));
}

/// One complete command pulled out of an accumulator.
enum Parsed {
    Tokens(Vec<String>),
    Bad(String),
}

/// Bytes from a cache client or the follower's leader link.
pub fn on_data(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, data: Bytes) {
    rt.shared.counters.add_in(data.len() as u64);
    let forced_resp = cache_cfg(rt).resp;
    let now = ctx.now();

    let (commands, is_follower, overflow) = {
        let Some(conn) = rt.conns.get_mut(&conn_id) else {
            return;
        };
        conn.touch(now);
        conn.acc.extend_from_slice(&data);
        if conn.acc.len() > PARTIAL_BUFFER_CAP {
            (Vec::new(), false, true)
        } else {
            let is_follower = matches!(conn.role, ConnRole::CacheFollower);
            // Wire mode detection runs once, on the first byte.
            if conn.proto == Proto::Unknown {
                conn.proto = if !is_follower && (forced_resp || conn.acc.first() == Some(&b'*')) {
                    Proto::Resp
                } else {
                    Proto::Line
                };
            }
            let mut commands = Vec::new();
            if conn.proto == Proto::Resp {
                loop {
                    match resp::parse_command(&conn.acc, PARTIAL_BUFFER_CAP) {
                        None => break,
                        Some(Ok((tokens, consumed))) => {
                            let _ = conn.acc.split_to(consumed);
                            commands.push(Parsed::Tokens(tokens));
                        }
                        Some(Err(error)) => {
                            commands.push(Parsed::Bad(format!("{:?}", error)));
                            break;
                        }
                    }
                }
            } else {
                for line in client::drain_lines(&mut rt.conns, conn_id) {
                    let tokens: Vec<String> =
                        line.split_whitespace().map(String::from).collect();
                    if !tokens.is_empty() {
                        commands.push(Parsed::Tokens(tokens));
                    }
                }
            }
            (commands, is_follower, false)
        }
    };

    if overflow {
        warn!(runtime = %rt.name(), conn = %conn_id, "partial buffer cap exceeded, closing");
        rt.close_conn(conn_id, false);
        return;
    }

    for parsed in commands {
        match parsed {
            Parsed::Bad(error) => {
                debug!(runtime = %rt.name(), error, "malformed cache request, closing");
                rt.close_conn(conn_id, false);
                return;
            }
            Parsed::Tokens(tokens) => {
                if is_follower {
                    apply_replicated(ctx, rt, &tokens);
                } else {
                    handle_command(ctx, rt, conn_id, &tokens);
                }
            }
        }
    }
}

/// Execute one client command and reply on its connection.
fn handle_command(ctx: &mut EngineCtx, rt: &mut LiveRuntime, conn_id: ConnId, tokens: &[String]) {
    rt.shared.counters.message();
    let cfg = cache_cfg(rt);
    let now_ms = ctx.epoch_ms();
    let command = tokens.first().map(|t| t.to_ascii_uppercase()).unwrap_or_default();

    let outcome = {
        let KindState::Cache(state) = &mut rt.kind else {
            return;
        };
        exec::execute(&mut state.store, cfg.access, now_ms, tokens)
    };

    let reply = match outcome {
        Exec::Reply(reply) => reply,
        Exec::Subscribe(channels) => {
            subscribe(rt, conn_id, &channels);
            return;
        }
        Exec::Unsubscribe(channels) => {
            unsubscribe(rt, conn_id, &channels);
            return;
        }
        Exec::Publish { channel, message } => {
            let delivered = publish(rt, &channel, &message);
            Reply::Int(delivered)
        }
        Exec::Flush(path) => flush(rt, &cfg, path.as_deref()),
        Exec::Load(path) => load(ctx, rt, &cfg, path.as_deref()),
        Exec::Sync => {
            mark_replica(rt, conn_id);
            Reply::ok()
        }
    };

    let failed = matches!(reply, Reply::Error(_));
    respond(rt, conn_id, &reply);

    if !failed && exec::is_mutation(&command) {
        replicate(rt, tokens, Some(conn_id));
    }
}

/// Leader mutation stream applied locally on a follower.
fn apply_replicated(ctx: &mut EngineCtx, rt: &mut LiveRuntime, tokens: &[String]) {
    // The leader's SYNC acknowledgment is not a command.
    if tokens.len() == 1 && tokens[0].eq_ignore_ascii_case("ok") {
        return;
    }
    let now_ms = ctx.epoch_ms();
    let outcome = match &mut rt.kind {
        KindState::Cache(state) => {
            exec::execute(&mut state.store, AccessMode::Admin, now_ms, tokens)
        }
        _ => return,
    };
    match outcome {
        Exec::Reply(Reply::Error(error)) => {
            debug!(runtime = %rt.name(), error, "replicated command failed")
        }
        _ => rt.shared.counters.message(),
    }
}

/// Mirror a mutation to every follower connection, excluding its origin.
fn replicate(rt: &mut LiveRuntime, tokens: &[String], origin: Option<ConnId>) {
    let replicas: Vec<ConnId> = match &rt.kind {
        KindState::Cache(state) if !state.replicas.is_empty() => {
            state.replicas.iter().copied().filter(|id| Some(*id) != origin).collect()
        }
        _ => return,
    };
    let line = tokens.join(" ");
    for replica in replicas {
        rt.send_text(replica, &line);
    }
}

fn respond(rt: &mut LiveRuntime, conn_id: ConnId, reply: &Reply) {
    let is_resp = rt.conns.get(&conn_id).map(|c| c.proto == Proto::Resp).unwrap_or(false);
    if is_resp {
        rt.send_raw(conn_id, Bytes::from(resp::encode_reply(reply)));
    } else {
        rt.send_text(conn_id, &exec::render_line(reply));
    }
}

fn subscribe(rt: &mut LiveRuntime, conn_id: ConnId, channels: &[String]) {
    for channel in channels {
        let count = {
            let Some(conn) = rt.conns.get_mut(&conn_id) else {
                return;
            };
            let ConnRole::CacheClient(state) = &mut conn.role else {
                return;
            };
            state.subscribed.insert(channel.clone());
            let KindState::Cache(cache) = &mut rt.kind else {
                return;
            };
            cache.channels.entry(channel.clone()).or_default().insert(conn_id);
            let subscribed_count = rt
                .conns
                .get(&conn_id)
                .map(|c| match &c.role {
                    ConnRole::CacheClient(s) => s.subscribed.len(),
                    _ => 0,
                })
                .unwrap_or(0);
            subscribed_count
        };
        let reply = Reply::Array(vec![
            Reply::bulk("subscribe"),
            Reply::bulk(channel.clone()),
            Reply::Int(count as i64),
        ]);
        respond(rt, conn_id, &reply);
    }
}

fn unsubscribe(rt: &mut LiveRuntime, conn_id: ConnId, channels: &[String]) {
    let targets: Vec<String> = if channels.is_empty() {
        match rt.conns.get(&conn_id).map(|c| &c.role) {
            Some(ConnRole::CacheClient(state)) => state.subscribed.iter().cloned().collect(),
            _ => Vec::new(),
        }
    } else {
        channels.to_vec()
    };
    for channel in targets {
        let remaining = {
            if let Some(conn) = rt.conns.get_mut(&conn_id) {
                if let ConnRole::CacheClient(state) = &mut conn.role {
                    state.subscribed.remove(&channel);
                }
            }
            if let KindState::Cache(cache) = &mut rt.kind {
                if let Some(subscribers) = cache.channels.get_mut(&channel) {
                    subscribers.remove(&conn_id);
                    if subscribers.is_empty() {
                        cache.channels.remove(&channel);
                    }
                }
            }
            rt.conns
                .get(&conn_id)
                .map(|c| match &c.role {
                    ConnRole::CacheClient(s) => s.subscribed.len(),
                    _ => 0,
                })
                .unwrap_or(0)
        };
        let reply = Reply::Array(vec![
            Reply::bulk("unsubscribe"),
            Reply::bulk(channel),
            Reply::Int(remaining as i64),
        ]);
        respond(rt, conn_id, &reply);
    }
}

/// Deliver to every subscriber of `channel`; returns the count delivered.
pub fn publish(rt: &mut LiveRuntime, channel: &str, message: &str) -> i64 {
    let subscribers: Vec<ConnId> = match &rt.kind {
        KindState::Cache(state) => {
            state.channels.get(channel).map(|s| s.iter().copied().collect()).unwrap_or_default()
        }
        _ => Vec::new(),
    };
    let mut delivered = 0;
    for subscriber in subscribers {
        let is_resp =
            rt.conns.get(&subscriber).map(|c| c.proto == Proto::Resp).unwrap_or(false);
        if is_resp {
            rt.send_raw(subscriber, Bytes::from(resp::message_record(channel, message)));
        } else {
            rt.send_text(subscriber, &format!("message {} {}", channel, message));
        }
        delivered += 1;
    }
    delivered
}

fn flush(rt: &mut LiveRuntime, cfg: &CacheConfig, path: Option<&str>) -> Reply {
    let target = match path {
        Some(path) => std::path::PathBuf::from(path),
        None => match &cfg.persist_path {
            Some(path) => path.clone(),
            None => return Reply::Error("no snapshot path configured".to_string()),
        },
    };
    let KindState::Cache(state) = &rt.kind else {
        return Reply::Error("not a cache".to_string());
    };
    match snapshot::save(&state.store, &target) {
        Ok(()) => Reply::ok(),
        Err(error) => Reply::Error(format!("flush failed: {}", error)),
    }
}

fn load(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    cfg: &CacheConfig,
    path: Option<&str>,
) -> Reply {
    let target = match path {
        Some(path) => std::path::PathBuf::from(path),
        None => match &cfg.persist_path {
            Some(path) => path.clone(),
            None => return Reply::Error("no snapshot path configured".to_string()),
        },
    };
    let now_ms = ctx.epoch_ms();
    match snapshot::load(&target, now_ms) {
        Ok(entries) => {
            let KindState::Cache(state) = &mut rt.kind else {
                return Reply::Error("not a cache".to_string());
            };
            state.store.clear();
            let mut loaded = 0i64;
            for (key, value, expiry) in entries {
                if state.store.put(&key, value, expiry).is_ok() {
                    loaded += 1;
                }
            }
            Reply::Int(loaded)
        }
        Err(error) => Reply::Error(format!("load failed: {}", error)),
    }
}

fn mark_replica(rt: &mut LiveRuntime, conn_id: ConnId) {
    if let Some(conn) = rt.conns.get_mut(&conn_id) {
        if let ConnRole::CacheClient(state) = &mut conn.role {
            state.replica = true;
        }
    }
    if let KindState::Cache(state) = &mut rt.kind {
        state.replicas.insert(conn_id);
    }
    info!(runtime = %rt.name(), conn = %conn_id, "replica attached");
}

/// Follower connect completion.
pub fn on_follower_connected(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    result: Result<tokio::net::TcpStream, std::io::Error>,
) {
    match result {
        Ok(stream) => {
            let conn_id = ctx.register_stream(rt, stream, None, ConnRole::CacheFollower);
            // Followers speak the line protocol to the leader.
            if let Some(conn) = rt.conns.get_mut(&conn_id) {
                conn.proto = Proto::Line;
            }
            if let KindState::Cache(state) = &mut rt.kind {
                state.follower_conn = Some(conn_id);
                state.follower_attempts = 0;
            }
            rt.send_text(conn_id, "SYNC");
            info!(runtime = %rt.name(), "replication link established");
        }
        Err(error) => {
            debug!(runtime = %rt.name(), %error, "leader connect failed");
            schedule_follower_reconnect(ctx, rt);
        }
    }
}

fn schedule_follower_reconnect(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    if rt.shared.state() != RuntimeState::Running {
        return;
    }
    let attempt = match &mut rt.kind {
        KindState::Cache(state) => {
            state.follower_attempts += 1;
            state.follower_attempts
        }
        _ => return,
    };
    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::Reconnect,
        client::backoff_delay(attempt),
        rt.cancel.child_token(),
    );
}

/// Reconnect timer for the follower link.
pub fn on_reconnect_timer(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    if rt.shared.state() != RuntimeState::Running {
        return;
    }
    if let Some(leader) = cache_cfg(rt).replicate_from {
        io::spawn_connect(
            ctx.events_tx.clone(),
            rt.id(),
            ConnectTarget::CacheFollower,
            leader,
            None,
            rt.cancel.child_token(),
        );
    }
}

/// TTL tick: sample random keys, drop expired ones, notify the hook.
pub fn on_ttl_tick(ctx: &mut EngineCtx, rt: &mut LiveRuntime) {
    let now_ms = ctx.epoch_ms();
    let expired = match &mut rt.kind {
        KindState::Cache(state) => state.store.sweep_expired(TTL_SAMPLE, now_ms),
        _ => Vec::new(),
    };
    if !expired.is_empty() {
        if let Some(hooks) = ctx.hooks.get(&rt.name()) {
            if let Some(on_expire) = &hooks.on_expire {
                for key in &expired {
                    on_expire(key);
                }
            }
        }
        debug!(runtime = %rt.name(), count = expired.len(), "expired keys swept");
    }
    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::TtlTick,
        TTL_TICK,
        rt.cancel.child_token(),
    );
}

/// A connection fully released: clear pub/sub and replication membership.
pub fn on_conn_released(
    ctx: &mut EngineCtx,
    rt: &mut LiveRuntime,
    conn_id: ConnId,
    role: &ConnRole,
) {
    match role {
        ConnRole::CacheClient(state) => {
            let subscribed: Vec<String> = state.subscribed.iter().cloned().collect();
            if let KindState::Cache(cache) = &mut rt.kind {
                for channel in subscribed {
                    if let Some(subscribers) = cache.channels.get_mut(&channel) {
                        subscribers.remove(&conn_id);
                        if subscribers.is_empty() {
                            cache.channels.remove(&channel);
                        }
                    }
                }
                cache.replicas.remove(&conn_id);
            }
        }
        ConnRole::CacheFollower => {
            if let KindState::Cache(cache) = &mut rt.kind {
                cache.follower_conn = None;
            }
            schedule_follower_reconnect(ctx, rt);
        }
        _ => {}
    }
}

/// Idle sweep: drop cache clients with no traffic past the timeout.
/// Subscribers are exempt; an idle subscriber is the normal case.
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
        .filter(|conn| match &conn.role {
            ConnRole::CacheClient(state) => {
                !conn.closing
                    && state.subscribed.is_empty()
                    && !state.replica
                    && now.saturating_duration_since(conn.last_activity) >= limit
            }
            _ => false,
        })
        .map(|conn| conn.id)
        .collect();
    for conn_id in stale {
        debug!(runtime = %rt.name(), conn = %conn_id, "closing idle cache client");
        rt.close_conn(conn_id, true);
    }
    io::spawn_timer(
        ctx.events_tx.clone(),
        Some(rt.id()),
        TimerKind::IdleSweep,
        limit.min(Duration::from_secs(10)).max(Duration::from_secs(1)),
        rt.cancel.child_token(),
    );
}

/// Execute a command line arriving through the control channel (`send`,
/// `action exec`, interactive sessions) or the linked-cache path.
pub fn execute_control(ctx: &mut EngineCtx, rt: &mut LiveRuntime, line: &str) -> Reply {
    let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
    if tokens.is_empty() {
        return Reply::Error("empty command".to_string());
    }
    rt.shared.counters.message();
    let cfg = cache_cfg(rt);
    let now_ms = ctx.epoch_ms();
    let command = tokens[0].to_ascii_uppercase();

    let outcome = {
        let KindState::Cache(state) = &mut rt.kind else {
            return Reply::Error("not a cache".to_string());
        };
        exec::execute(&mut state.store, cfg.access, now_ms, &tokens)
    };
    let reply = match outcome {
        Exec::Reply(reply) => reply,
        Exec::Publish { channel, message } => Reply::Int(publish(rt, &channel, &message)),
        Exec::Flush(path) => flush(rt, &cfg, path.as_deref()),
        Exec::Load(path) => load(ctx, rt, &cfg, path.as_deref()),
        Exec::Subscribe(_) | Exec::Unsubscribe(_) | Exec::Sync => {
            Reply::Error("requires a cache connection".to_string())
        }
    };
    if !matches!(reply, Reply::Error(_)) && exec::is_mutation(&command) {
        replicate(rt, &tokens, None);
    }
    reply
}

/// Store one server message under a monotonic key (linked store-cache).
pub fn store_message(rt: &mut LiveRuntime, key: &str, value: &str) {
    let result = match &mut rt.kind {
        KindState::Cache(state) => state.store.put(key, Value::Str(value.to_string()), None),
        _ => return,
    };
    if let Err(error) = result {
        debug!(runtime = %rt.name(), %error, "store-cache write rejected");
    }
}
