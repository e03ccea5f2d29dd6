// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The completion event engine.
//!
//! One task owns every runtime's state machine. I/O tasks submit work
//! (accepts, reads, writes, connects, timers, probes) through the
//! [`io`] layer and their completions arrive as tagged [`Event`]s on one
//! bounded channel; `run` dispatches each to the owning runtime. Handlers
//! never block: they mutate state, submit successor operations, and
//! return. Per-connection event order follows submission order because a
//! connection's reader is sequential and its write queue is FIFO.

mod commands;
pub mod conn;
pub mod event;
pub mod io;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use socketley_core::{Clock, RuntimeId, RuntimeKind, RuntimeState, SystemClock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hooks::HookRegistry;
use crate::registry::{Registry, RuntimeShared};
use crate::runtime::{cache, client, proxy, server, KindState, LiveRuntime};
use crate::storage::Sidecars;
use conn::{ConnRole, Connection};
use event::{ConnId, ConnectTarget, Event, SessionId, TimerKind};

/// Engine event channel depth. Readers block (backpressure) when the
/// loop falls behind.
const EVENT_QUEUE: usize = 1024;

/// Cross-runtime work queued during a dispatch and drained right after
/// it. Name-keyed on purpose: the registry is the only resolver.
#[derive(Debug)]
pub enum InternalMsg {
    /// Forward a message into another runtime (sub-server routing).
    Deliver { target: String, text: String, hops: u8 },
    /// Execute a cache command on behalf of a server connection.
    CacheExec { cache: String, line: String, reply_to: Option<(RuntimeId, ConnId)> },
    /// Store one message under a monotonic key.
    CacheStore { cache: String, key: String, value: String },
    /// Deliver a reply line to a specific connection.
    Reply { rt: RuntimeId, conn: ConnId, text: String },
}

/// Everything handlers need besides the runtime itself.
pub struct EngineCtx {
    pub registry: Arc<Registry>,
    pub storage: Sidecars,
    pub events_tx: mpsc::Sender<Event>,
    pub hooks: HookRegistry,
    pub pending: VecDeque<InternalMsg>,
    clock: SystemClock,
    next_conn: u64,
    next_session: u64,
}

impl EngineCtx {
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn epoch_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    fn alloc_conn(&mut self) -> ConnId {
        self.next_conn += 1;
        ConnId(self.next_conn)
    }

    fn alloc_session(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId(self.next_session)
    }

    /// Write the runtime's sidecar; persistence failures are logged, not
    /// fatal.
    pub fn persist(&self, shared: &RuntimeShared) {
        if let Err(error) = self.storage.save(&shared.to_spec()) {
            warn!(runtime = %shared.name(), %error, "failed to persist runtime");
        }
    }

    /// Turn an established stream into a tracked connection: NODELAY,
    /// split halves, reader and writer submissions, table entry.
    pub fn register_stream(
        &mut self,
        rt: &mut LiveRuntime,
        stream: TcpStream,
        peer: Option<SocketAddr>,
        role: ConnRole,
    ) -> ConnId {
        let _ = stream.set_nodelay(true);
        let conn_id = self.alloc_conn();
        let (read_half, write_half) = stream.into_split();
        let (queue_tx, queue_rx) = io::write_queue();
        let cancel_read = CancellationToken::new();
        let cancel_write = CancellationToken::new();
        io::spawn_reader(read_half, self.events_tx.clone(), rt.id(), conn_id, cancel_read.clone());
        io::spawn_writer(
            write_half,
            queue_rx,
            self.events_tx.clone(),
            rt.id(),
            conn_id,
            cancel_write.clone(),
        );
        let connection = Connection::new(
            conn_id,
            peer,
            queue_tx,
            cancel_read,
            cancel_write,
            rt.cfg.conn_rate,
            self.now(),
            role,
        );
        rt.conns.insert(conn_id, connection);
        rt.shared.counters.connection_opened();
        conn_id
    }
}

/// Cloneable handle for the listener and signal tasks.
#[derive(Clone)]
pub struct EngineHandle {
    pub events_tx: mpsc::Sender<Event>,
}

/// The engine loop and the fleet's live state.
pub struct Engine {
    pub ctx: EngineCtx,
    events_rx: mpsc::Receiver<Event>,
    live: HashMap<RuntimeId, LiveRuntime>,
    /// Removed runtimes kept alive until their in-flight completions
    /// drain (deferred destruction).
    doomed: Vec<LiveRuntime>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, storage: Sidecars) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let handle = EngineHandle { events_tx: events_tx.clone() };
        let engine = Self {
            ctx: EngineCtx {
                registry,
                storage,
                events_tx,
                hooks: HookRegistry::default(),
                pending: VecDeque::new(),
                clock: SystemClock,
                next_conn: 0,
                next_session: 0,
            },
            events_rx,
            live: HashMap::new(),
            doomed: Vec::new(),
        };
        (engine, handle)
    }

    /// Boot restore: create every persisted runtime (without firing
    /// on-start hooks) and start those that were running.
    pub fn restore(&mut self) {
        let specs = self.ctx.storage.load_all();
        let mut autostart = Vec::new();
        for spec in specs {
            let name = spec.name.clone();
            let shared = Arc::new(RuntimeShared::from_spec(&spec));
            match self.ctx.registry.insert_restored(shared) {
                Ok(()) => {
                    if spec.was_running {
                        autostart.push(name);
                    }
                }
                Err(error) => warn!(runtime = %name, %error, "restore conflict, skipping"),
            }
        }
        info!(count = self.ctx.registry.len(), "fleet restored");
        for name in autostart {
            if let Err(error) = self.start_runtime(&name) {
                warn!(runtime = %name, error, "autostart failed");
            }
        }
    }

    /// Run until a `Shutdown` event, then drain.
    pub async fn run(mut self) {
        loop {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            if matches!(event, Event::Shutdown) {
                info!("engine shutting down");
                self.shutdown_all().await;
                break;
            }
            self.dispatch(event);
            self.drain_internal();
        }
    }

    /// Find a runtime's live state, including runtimes pending
    /// destruction (their completions still need a home).
    fn find_live(&mut self, id: &RuntimeId) -> Option<&mut LiveRuntime> {
        find_live(&mut self.live, &mut self.doomed, id)
    }

    /// Single dispatch entry: every completion goes through here.
    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Shutdown => {}
            Event::Control(msg) => commands::handle(self, msg),

            Event::SessionLine { rt, session, line } => self.session_input(rt, session, &line),
            Event::SessionClosed { rt, session } => {
                if let Some(live) = self.find_live(&rt) {
                    live.sessions.remove(&session);
                }
            }

            Event::Accepted { rt, stream, peer } => {
                let Some(live) = self.live.get_mut(&rt) else {
                    return;
                };
                if live.shared.state() != RuntimeState::Running {
                    return;
                }
                if live.conns.len() >= live.cfg.max_connections {
                    debug!(runtime = %live.name(), "max connections reached, rejecting");
                    return;
                }
                match live.shared.kind {
                    RuntimeKind::Server => server::on_accepted(&mut self.ctx, live, stream, peer),
                    RuntimeKind::Proxy => proxy::on_accepted(&mut self.ctx, live, stream, peer),
                    RuntimeKind::Cache => cache::on_accepted(&mut self.ctx, live, stream, peer),
                    RuntimeKind::Client => drop(stream),
                }
            }
            Event::AcceptError { rt, error } => {
                if let Some(live) = self.find_live(&rt) {
                    debug!(runtime = %live.name(), %error, "accept error (backing off)");
                }
            }

            Event::ConnData { rt, conn, data } => {
                let Some(live) = find_live(&mut self.live, &mut self.doomed, &rt) else {
                    return;
                };
                match live.shared.kind {
                    RuntimeKind::Server => server::on_data(&mut self.ctx, live, conn, data),
                    RuntimeKind::Client => client::on_data(&mut self.ctx, live, conn, data),
                    RuntimeKind::Cache => cache::on_data(&mut self.ctx, live, conn, data),
                    RuntimeKind::Proxy => {
                        match live.conns.get(&conn).map(|c| {
                            matches!(c.role, ConnRole::ProxyClient(_))
                        }) {
                            Some(true) => {
                                proxy::on_client_data(&mut self.ctx, live, conn, data)
                            }
                            Some(false) => {
                                proxy::on_backend_data(&mut self.ctx, live, conn, data)
                            }
                            None => {}
                        }
                    }
                }
            }

            Event::ReadClosed { rt, conn, error } => self.half_closed(rt, conn, true, error),
            Event::WriteClosed { rt, conn, error } => self.half_closed(rt, conn, false, error),

            Event::Datagram { rt, peer, data } => {
                let Some(live) = find_live(&mut self.live, &mut self.doomed, &rt) else {
                    return;
                };
                match live.shared.kind {
                    RuntimeKind::Server => server::on_datagram(&mut self.ctx, live, peer, data),
                    RuntimeKind::Client => client::on_datagram(&mut self.ctx, live, data),
                    _ => {}
                }
            }

            Event::Connected { rt, target, result, resolved } => {
                let Some(live) = self.live.get_mut(&rt) else {
                    return;
                };
                if live.shared.state() != RuntimeState::Running {
                    return;
                }
                match target {
                    ConnectTarget::ClientMain => {
                        client::on_connected(&mut self.ctx, live, result, resolved)
                    }
                    ConnectTarget::Upstream(index) => {
                        server::on_upstream_connected(&mut self.ctx, live, index, result)
                    }
                    ConnectTarget::ProxyBackend { client: client_conn, backend } => {
                        proxy::on_backend_connected(
                            &mut self.ctx,
                            live,
                            client_conn,
                            backend,
                            result,
                        )
                    }
                    ConnectTarget::CacheFollower => {
                        cache::on_follower_connected(&mut self.ctx, live, result)
                    }
                }
            }

            Event::Probe { rt, backend, healthy } => {
                if let Some(live) = self.live.get_mut(&rt) {
                    proxy::on_probe(live, backend, healthy);
                }
            }

            Event::Timer { rt: None, kind: TimerKind::ReapTick } => self.reap_doomed(),
            Event::Timer { rt: None, .. } => {}
            Event::Timer { rt: Some(rt), kind } => {
                let Some(live) = self.live.get_mut(&rt) else {
                    return;
                };
                match (kind, live.shared.kind) {
                    (TimerKind::Reconnect, RuntimeKind::Client) => {
                        client::on_reconnect_timer(&mut self.ctx, live)
                    }
                    (TimerKind::Reconnect, RuntimeKind::Cache) => {
                        cache::on_reconnect_timer(&mut self.ctx, live)
                    }
                    (TimerKind::UpstreamReconnect(index), RuntimeKind::Server) => {
                        server::on_upstream_timer(&mut self.ctx, live, index)
                    }
                    (TimerKind::IdleSweep, RuntimeKind::Server) => {
                        server::on_idle_sweep(&mut self.ctx, live)
                    }
                    (TimerKind::IdleSweep, RuntimeKind::Cache) => {
                        cache::on_idle_sweep(&mut self.ctx, live)
                    }
                    (TimerKind::HealthTick, RuntimeKind::Proxy) => {
                        proxy::on_health_tick(&mut self.ctx, live)
                    }
                    (TimerKind::PoolSweep, RuntimeKind::Proxy) => {
                        proxy::on_pool_sweep(&mut self.ctx, live)
                    }
                    (TimerKind::TtlTick, RuntimeKind::Cache) => {
                        cache::on_ttl_tick(&mut self.ctx, live)
                    }
                    _ => {}
                }
            }
        }
    }

    /// One I/O half reported its terminal event. Flip the flag, start the
    /// half-close if needed, and release the connection once both halves
    /// are done (§invariant: never earlier).
    fn half_closed(
        &mut self,
        rt_id: RuntimeId,
        conn_id: ConnId,
        is_read: bool,
        error: Option<std::io::Error>,
    ) {
        let Some(live) = find_live(&mut self.live, &mut self.doomed, &rt_id) else {
            return;
        };
        let released = {
            let Some(connection) = live.conns.get_mut(&conn_id) else {
                return;
            };
            if is_read {
                connection.read_open = false;
            } else {
                connection.write_open = false;
            }
            if let Some(error) = error {
                debug!(conn = %conn_id, %error, half = if is_read { "read" } else { "write" },
                    "half closed with error");
            }
            if !connection.closing {
                // Peer closed or errored one direction: half-close and
                // wait for the other direction's completion.
                connection.begin_close(true);
            }
            connection.is_released()
        };
        if !released {
            return;
        }

        let Some(connection) = live.conns.remove(&conn_id) else {
            return;
        };
        live.shared.counters.connection_closed();
        let running = live.shared.state() == RuntimeState::Running;
        if running {
            match live.shared.kind {
                RuntimeKind::Server => {
                    server::on_conn_released(&mut self.ctx, live, conn_id, &connection.role)
                }
                RuntimeKind::Client => client::on_conn_released(&mut self.ctx, live, conn_id),
                RuntimeKind::Proxy => {
                    proxy::on_conn_released(&mut self.ctx, live, conn_id, connection.role)
                }
                RuntimeKind::Cache => {
                    cache::on_conn_released(&mut self.ctx, live, conn_id, &connection.role)
                }
            }
        }

        // A doomed runtime with nothing in flight can finally go.
        self.reap_doomed();
    }

    /// Drop destruction-pending runtimes whose completions have drained.
    fn reap_doomed(&mut self) {
        self.doomed.retain(|rt| {
            if rt.drained() {
                debug!(runtime = %rt.name(), "deferred destruction complete");
                false
            } else {
                true
            }
        });
    }

    /// Process cross-runtime work queued by the last dispatch. Bounded so
    /// a routing cycle cannot spin the loop.
    fn drain_internal(&mut self) {
        let mut budget = 64;
        while budget > 0 {
            budget -= 1;
            let Some(msg) = self.ctx.pending.pop_front() else {
                return;
            };
            match msg {
                InternalMsg::Deliver { target, text, hops } => {
                    if hops >= 4 {
                        warn!(target, "routing loop detected, dropping message");
                        continue;
                    }
                    let Some(id) = self.ctx.registry.get(&target).map(|s| s.id.clone()) else {
                        debug!(target, "route target missing");
                        continue;
                    };
                    let Some(live) = self.live.get_mut(&id) else {
                        continue;
                    };
                    if live.shared.state() != RuntimeState::Running {
                        continue;
                    }
                    match live.shared.kind {
                        RuntimeKind::Server => server::inject(live, &text),
                        RuntimeKind::Client => {
                            let _ = client::send(live, &text);
                        }
                        RuntimeKind::Cache => {
                            let _ = cache::execute_control(&mut self.ctx, live, &text);
                        }
                        RuntimeKind::Proxy => {}
                    }
                }
                InternalMsg::CacheExec { cache: cache_name, line, reply_to } => {
                    let reply = match self
                        .ctx
                        .registry
                        .get(&cache_name)
                        .map(|s| s.id.clone())
                        .and_then(|id| self.live.get_mut(&id))
                    {
                        Some(live) if live.shared.kind == RuntimeKind::Cache => {
                            let reply = cache::execute_control(&mut self.ctx, live, &line);
                            cache::exec::render_line(&reply)
                        }
                        _ => "error: no such cache".to_string(),
                    };
                    if let Some((rt, conn)) = reply_to {
                        self.ctx.pending.push_back(InternalMsg::Reply { rt, conn, text: reply });
                    }
                }
                InternalMsg::CacheStore { cache: cache_name, key, value } => {
                    if let Some(live) = self
                        .ctx
                        .registry
                        .get(&cache_name)
                        .map(|s| s.id.clone())
                        .and_then(|id| self.live.get_mut(&id))
                    {
                        if live.shared.kind == RuntimeKind::Cache {
                            cache::store_message(live, &key, &value);
                        }
                    }
                }
                InternalMsg::Reply { rt, conn, text } => {
                    if let Some(live) = self.find_live(&rt) {
                        live.send_text(conn, &text);
                    }
                }
            }
        }
        if !self.ctx.pending.is_empty() {
            warn!(left = self.ctx.pending.len(), "internal queue budget hit, dropping remainder");
            self.ctx.pending.clear();
        }
    }

    /// Line typed into an interactive session: broadcast for a server,
    /// send for a client, execute for a cache.
    fn session_input(&mut self, rt_id: RuntimeId, session: SessionId, line: &str) {
        let Some(live) = self.live.get_mut(&rt_id) else {
            return;
        };
        if live.shared.state() != RuntimeState::Running {
            return;
        }
        match live.shared.kind {
            RuntimeKind::Server => server::inject(live, line),
            RuntimeKind::Client => {
                if let Err(error) = client::send(live, line) {
                    reply_session(live, session, &format!("error: {}", error));
                }
            }
            RuntimeKind::Cache => {
                let reply = cache::execute_control(&mut self.ctx, live, line);
                let rendered = cache::exec::render_line(&reply);
                reply_session(live, session, &rendered);
            }
            RuntimeKind::Proxy => {
                reply_session(live, session, "error: proxy does not accept input");
            }
        }
    }

    /// Transition created|stopped → running by running the engine setup.
    pub fn start_runtime(&mut self, name: &str) -> Result<(), String> {
        let Some(shared) = self.ctx.registry.get(name) else {
            return Err(format!("no such runtime: {}", name));
        };
        if shared.is_external() {
            return Err(format!("{} is external", name));
        }
        if shared.state() == RuntimeState::Running {
            return Err(format!("{} is already running", name));
        }

        // A previous stop may still be draining; setup clears the table.
        self.live.remove(&shared.id);

        let mut live = LiveRuntime::new(Arc::clone(&shared), self.ctx.now());
        let setup_result = match shared.kind {
            RuntimeKind::Server => server::setup(&mut self.ctx, &mut live),
            RuntimeKind::Client => client::setup(&mut self.ctx, &mut live),
            RuntimeKind::Proxy => proxy::setup(&mut self.ctx, &mut live),
            RuntimeKind::Cache => cache::setup(&mut self.ctx, &mut live),
        };
        if let Err(error) = setup_result {
            live.cancel.cancel();
            shared.set_state(RuntimeState::Failed);
            self.ctx.persist(&shared);
            return Err(error);
        }

        if live.cfg.idle_timeout_secs > 0
            && matches!(shared.kind, RuntimeKind::Server | RuntimeKind::Cache)
        {
            io::spawn_timer(
                self.ctx.events_tx.clone(),
                Some(live.id()),
                TimerKind::IdleSweep,
                Duration::from_secs(live.cfg.idle_timeout_secs.min(10).max(1)),
                live.cancel.child_token(),
            );
        }

        shared.counters.reset_current();
        shared.set_state(RuntimeState::Running);
        *shared.started_at_ms.lock() = Some(self.ctx.epoch_ms());
        self.live.insert(shared.id.clone(), live);
        self.ctx.persist(&shared);
        info!(runtime = %name, "started");
        Ok(())
    }

    /// Tear down: cancel submissions, half-close every connection, apply
    /// child policies. Connection structs stay until their completions
    /// drain.
    pub fn stop_runtime(&mut self, name: &str) -> Result<(), String> {
        self.stop_runtime_with(name, true)
    }

    /// `persist_sidecar` is false on daemon shutdown: the runtime stops,
    /// but `was_running` stays true so the next boot restarts it.
    fn stop_runtime_with(&mut self, name: &str, persist_sidecar: bool) -> Result<(), String> {
        let Some(shared) = self.ctx.registry.get(name) else {
            return Err(format!("no such runtime: {}", name));
        };
        if shared.is_external() {
            return Err(format!("{} is external", name));
        }
        if !matches!(shared.state(), RuntimeState::Running | RuntimeState::Failed) {
            return Err(format!("{} is not running", name));
        }

        if let Some(live) = self.live.get_mut(&shared.id) {
            live.cancel.cancel();
            let drain = live.cfg.drain_on_stop;
            live.close_all(drain);
            live.sessions.clear();
        }
        shared.set_state(RuntimeState::Stopped);
        *shared.started_at_ms.lock() = None;
        if persist_sidecar {
            self.ctx.persist(&shared);
        }
        info!(runtime = %name, "stopped");

        if persist_sidecar {
            self.apply_child_policies(name);
        }
        Ok(())
    }

    /// Stop-if-needed, extract from the registry, delete persistence, and
    /// park the live state for deferred destruction.
    pub fn remove_runtime(&mut self, name: &str) -> Result<(), String> {
        let Some(shared) = self.ctx.registry.get(name) else {
            return Err(format!("no such runtime: {}", name));
        };
        if matches!(shared.state(), RuntimeState::Running | RuntimeState::Failed)
            && !shared.is_external()
        {
            let _ = self.stop_runtime(name);
        } else {
            self.apply_child_policies(name);
        }

        let Some(shared) = self.ctx.registry.extract(name) else {
            return Err(format!("no such runtime: {}", name));
        };
        self.ctx.storage.delete(name);
        self.ctx.hooks.remove(name);

        if let Some(live) = self.live.remove(&shared.id) {
            if live.drained() {
                debug!(runtime = %name, "destroyed");
            } else {
                self.doomed.push(live);
                // Zero-duration timeout: by the time it completes, this
                // dispatch round's completions have been delivered.
                io::spawn_timer(
                    self.ctx.events_tx.clone(),
                    None,
                    TimerKind::ReapTick,
                    Duration::from_millis(0),
                    CancellationToken::new(),
                );
            }
        }
        info!(runtime = %name, "removed");
        Ok(())
    }

    /// Apply each child's own policy when its owner stops or goes away.
    fn apply_child_policies(&mut self, owner: &str) {
        for child in self.ctx.registry.children(owner) {
            let policy = self
                .ctx
                .registry
                .get(&child)
                .map(|shared| shared.config.lock().child_policy)
                .unwrap_or_default();
            let result = match policy {
                socketley_core::ChildPolicy::Stop => {
                    if self
                        .ctx
                        .registry
                        .get(&child)
                        .map(|s| s.state() == RuntimeState::Running)
                        .unwrap_or(false)
                    {
                        self.stop_runtime(&child)
                    } else {
                        Ok(())
                    }
                }
                socketley_core::ChildPolicy::Remove => self.remove_runtime(&child),
            };
            if let Err(error) = result {
                warn!(child = %child, error, "child policy failed");
            }
        }
    }

    /// Feed one input line into a runtime (control `send`, routed
    /// delivery). A cache returns its rendered reply.
    pub fn runtime_input(&mut self, name: &str, text: &str) -> Result<Option<String>, String> {
        let Some(shared) = self.ctx.registry.get(name) else {
            return Err(format!("no such runtime: {}", name));
        };
        if shared.state() != RuntimeState::Running {
            return Err(format!("{} is not running", name));
        }
        let Some(live) = self.live.get_mut(&shared.id) else {
            return Err(format!("{} is not running", name));
        };
        match shared.kind {
            RuntimeKind::Server => {
                server::inject(live, text);
                Ok(None)
            }
            RuntimeKind::Client => client::send(live, text).map(|_| None),
            RuntimeKind::Cache => {
                let reply = cache::execute_control(&mut self.ctx, live, text);
                Ok(Some(cache::exec::render_line(&reply)))
            }
            RuntimeKind::Proxy => Err("proxy does not accept input".to_string()),
        }
    }

    /// Register an interactive session on a running runtime.
    pub fn register_session(
        &mut self,
        name: &str,
        out: mpsc::Sender<Bytes>,
    ) -> Result<(RuntimeId, SessionId), String> {
        let Some(shared) = self.ctx.registry.get(name) else {
            return Err(format!("no such runtime: {}", name));
        };
        let Some(live) = self.live.get_mut(&shared.id) else {
            return Err(format!("{} is not running", name));
        };
        let session = self.ctx.alloc_session();
        live.sessions.insert(session, out);
        Ok((shared.id.clone(), session))
    }

    /// Orderly drain on shutdown: stop everything, then wait (bounded)
    /// for connection completions.
    async fn shutdown_all(&mut self) {
        let names: Vec<String> =
            self.ctx.registry.list().iter().map(|shared| shared.name()).collect();
        for name in names {
            let running = self
                .ctx
                .registry
                .get(&name)
                .map(|s| matches!(s.state(), RuntimeState::Running | RuntimeState::Failed))
                .unwrap_or(false);
            if running {
                if let Err(error) = self.stop_runtime_with(&name, false) {
                    warn!(runtime = %name, error, "stop on shutdown failed");
                }
            }
        }

        let deadline = tokio::time::Instant::now() + crate::env::drain_timeout();
        while self.live.values().any(|rt| !rt.drained()) {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if !matches!(event, Event::Shutdown | Event::Control(_)) {
                self.dispatch(event);
            }
        }
        info!("engine drained");
    }

    pub(crate) fn live_mut(&mut self, id: &RuntimeId) -> Option<&mut LiveRuntime> {
        self.live.get_mut(id)
    }

    /// `action <client> reconnect`: reset the backoff and connect now.
    pub(crate) fn client_reconnect_now(&mut self, name: &str) -> event::CmdReply {
        let Some(shared) = self.ctx.registry.get(name) else {
            return event::CmdReply::user_error(format!("no such runtime: {}", name));
        };
        if shared.state() != RuntimeState::Running {
            return event::CmdReply::user_error(format!("{} is not running", name));
        }
        let Some(live) = self.live.get_mut(&shared.id) else {
            return event::CmdReply::user_error(format!("{} is not running", name));
        };
        client::reconnect_now(&mut self.ctx, live);
        event::CmdReply::ok("reconnecting")
    }

    /// `action <proxy> check`: run every health probe immediately.
    pub(crate) fn proxy_check_now(&mut self, name: &str) -> event::CmdReply {
        let Some(shared) = self.ctx.registry.get(name) else {
            return event::CmdReply::user_error(format!("no such runtime: {}", name));
        };
        let Some(live) = self.live.get_mut(&shared.id) else {
            return event::CmdReply::user_error(format!("{} is not running", name));
        };
        proxy::probe_all(&mut self.ctx, live);
        event::CmdReply::ok("health checks submitted")
    }
}

/// Field-precise lookup so handlers can hold the runtime and the context
/// at the same time.
fn find_live<'a>(
    live: &'a mut HashMap<RuntimeId, LiveRuntime>,
    doomed: &'a mut Vec<LiveRuntime>,
    id: &RuntimeId,
) -> Option<&'a mut LiveRuntime> {
    if live.contains_key(id) {
        return live.get_mut(id);
    }
    doomed.iter_mut().find(|rt| rt.shared.id == *id)
}

fn reply_session(live: &mut LiveRuntime, session: SessionId, text: &str) {
    if let Some(out) = live.sessions.get(&session) {
        let mut framed = String::with_capacity(text.len() + 1);
        framed.push_str(text);
        framed.push('\n');
        let _ = out.try_send(Bytes::from(framed));
    }
}
