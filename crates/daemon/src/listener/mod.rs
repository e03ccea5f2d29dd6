// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-channel listener.
//!
//! Accepts Unix-socket sessions and handles them in spawned tasks so the
//! engine loop never blocks on a client. Status readouts are answered
//! here straight from the registry (reader lock, counter snapshots);
//! mutations travel to the engine as [`ControlMsg`]s with a oneshot
//! reply. A successful `start -i` ends the framing and bridges the
//! session into the runtime as a raw line stream.

use std::sync::Arc;

use bytes::Bytes;
use socketley_core::{Clock as _, RuntimeId, RuntimeState};
use socketley_wire::{read_line, write_reply, CmdStatus, Command, ProtocolError};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::engine::event::{CmdReply, ControlMsg, Event, SessionId};
use crate::engine::EngineHandle;
use crate::env;
use crate::registry::Registry;

/// Longest accepted command line.
const MAX_LINE: usize = 64 * 1024;

/// Interactive session output queue depth.
const SESSION_QUEUE: usize = 256;

pub struct ControlListener {
    socket: UnixListener,
    registry: Arc<Registry>,
    engine: EngineHandle,
}

impl ControlListener {
    pub fn new(socket: UnixListener, registry: Arc<Registry>, engine: EngineHandle) -> Self {
        Self { socket, registry, engine }
    }

    /// Accept loop; one spawned task per session.
    pub async fn run(self) {
        info!("control listener ready");
        loop {
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let registry = Arc::clone(&self.registry);
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(error) = handle_session(reader, writer, registry, engine).await
                        {
                            match error {
                                ProtocolError::ConnectionClosed => debug!("client disconnected"),
                                other => debug!(error = %other, "session error"),
                            }
                        }
                    });
                }
                Err(error) => error!(%error, "control accept error"),
            }
        }
    }
}

async fn handle_session(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    registry: Arc<Registry>,
    engine: EngineHandle,
) -> Result<(), ProtocolError> {
    loop {
        let Some(line) = read_line(&mut reader, MAX_LINE).await? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(error) => {
                write_reply(
                    &mut writer,
                    CmdStatus::UserError,
                    error.to_string().as_bytes(),
                    env::ipc_timeout(),
                )
                .await?;
                continue;
            }
        };
        debug!(?command, "control command");

        // Status readouts never round-trip through the engine.
        if let Some((status, body)) = answer_query(&registry, &command) {
            write_reply(&mut writer, status, body.as_bytes(), env::ipc_timeout()).await?;
            continue;
        }

        let interactive = matches!(command, Command::Start { interactive: true, .. });
        let (session_out, session_in) = if interactive {
            let (tx, rx) = mpsc::channel::<Bytes>(SESSION_QUEUE);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = ControlMsg { command, reply: reply_tx, session_out };
        if engine.events_tx.send(Event::Control(msg)).await.is_err() {
            write_reply(
                &mut writer,
                CmdStatus::InternalError,
                b"daemon shutting down",
                env::ipc_timeout(),
            )
            .await?;
            return Ok(());
        }
        let reply = match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => CmdReply::internal_error("engine dropped the command"),
        };
        write_reply(&mut writer, reply.status, reply.body.as_bytes(), env::ipc_timeout()).await?;

        if let (Some((rt, session)), Some(out)) = (reply.session, session_in) {
            // Framing ends here; the connection becomes a raw byte
            // stream bound to the runtime.
            return interactive_bridge(reader, writer, rt, session, out, engine).await;
        }
    }
}

/// Raw bidirectional bridge for an interactive session: client lines are
/// forwarded as runtime inputs; runtime output is mirrored back.
async fn interactive_bridge(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    rt: RuntimeId,
    session: SessionId,
    mut out: mpsc::Receiver<Bytes>,
    engine: EngineHandle,
) -> Result<(), ProtocolError> {
    loop {
        tokio::select! {
            line = read_line(&mut reader, MAX_LINE) => match line {
                Ok(Some(line)) => {
                    let event = Event::SessionLine { rt: rt.clone(), session, line };
                    if engine.events_tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = engine
                        .events_tx
                        .send(Event::SessionClosed { rt, session })
                        .await;
                    return Ok(());
                }
            },
            chunk = out.recv() => match chunk {
                Some(chunk) => writer.write_all(&chunk).await.map_err(ProtocolError::Io)?,
                // Runtime went away (stop/remove): end the session.
                None => return Ok(()),
            },
        }
    }
}

/// Answer `ls`/`ps`/`show`/`dump`/`stats` from registry snapshots.
fn answer_query(registry: &Registry, command: &Command) -> Option<(CmdStatus, String)> {
    match command {
        Command::Ls => {
            let mut out = format!(
                "{:<16} {:<7} {:<8} {:>6} {:<10} {:<10}\n",
                "NAME", "TYPE", "STATE", "PORT", "GROUP", "OWNER"
            );
            for shared in registry.list() {
                let config = shared.config.lock();
                let external = if shared.is_external() { " (external)" } else { "" };
                out.push_str(&format!(
                    "{:<16} {:<7} {:<8} {:>6} {:<10} {:<10}{}\n",
                    shared.name(),
                    shared.kind.to_string(),
                    shared.state().to_string(),
                    config.port,
                    config.group.as_deref().unwrap_or("-"),
                    config.owner.as_deref().unwrap_or("-"),
                    external,
                ));
            }
            Some((CmdStatus::Ok, out))
        }
        Command::Ps => {
            let now_ms = socketley_core::SystemClock.epoch_ms();
            let mut out = format!(
                "{:<16} {:<7} {:>6} {:>8} {:>10} {:>12} {:>12} {:>8}\n",
                "NAME", "TYPE", "CONNS", "PEAK", "MSGS", "IN", "OUT", "UPTIME"
            );
            for shared in registry.list() {
                if shared.state() != RuntimeState::Running {
                    continue;
                }
                let snap = shared.counters.snapshot();
                let uptime = shared
                    .started_at_ms
                    .lock()
                    .map(|at| (now_ms.saturating_sub(at)) / 1000)
                    .unwrap_or(0);
                out.push_str(&format!(
                    "{:<16} {:<7} {:>6} {:>8} {:>10} {:>12} {:>12} {:>7}s\n",
                    shared.name(),
                    shared.kind.to_string(),
                    snap.current_connections,
                    snap.peak_connections,
                    snap.total_messages,
                    snap.bytes_in,
                    snap.bytes_out,
                    uptime,
                ));
            }
            Some((CmdStatus::Ok, out))
        }
        Command::Show { name } => match registry.get(name) {
            Some(shared) => match serde_json::to_string_pretty(&shared.to_spec()) {
                Ok(json) => Some((CmdStatus::Ok, json)),
                Err(error) => Some((CmdStatus::InternalError, error.to_string())),
            },
            None => Some((CmdStatus::UserError, format!("no such runtime: {}", name))),
        },
        Command::Dump { pattern } => {
            let specs: Vec<_> = match pattern {
                Some(pattern) => {
                    registry.resolve(pattern).iter().map(|shared| shared.to_spec()).collect()
                }
                None => registry.list().iter().map(|shared| shared.to_spec()).collect(),
            };
            match serde_json::to_string_pretty(&specs) {
                Ok(json) => Some((CmdStatus::Ok, json)),
                Err(error) => Some((CmdStatus::InternalError, error.to_string())),
            }
        }
        Command::Stats { pattern } => {
            let targets = match pattern {
                Some(pattern) => registry.resolve(pattern),
                None => registry.list(),
            };
            if targets.is_empty() {
                return Some((CmdStatus::UserError, "no matching runtime".to_string()));
            }
            let mut out = String::new();
            for shared in targets {
                let snap = shared.counters.snapshot();
                out.push_str(&format!(
                    "{}: state={} conns={} peak={} total_conns={} msgs={} in={} out={}\n",
                    shared.name(),
                    shared.state(),
                    snap.current_connections,
                    snap.peak_connections,
                    snap.total_connections,
                    snap.total_messages,
                    snap.bytes_in,
                    snap.bytes_out,
                ));
            }
            Some((CmdStatus::Ok, out))
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
