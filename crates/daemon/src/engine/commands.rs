// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mutating control commands, executed on the engine loop. Status
//! readouts (`ls`, `ps`, `show`, `dump`, `stats`) are answered by the
//! listener straight from the registry and never reach this module.

use std::str::FromStr;

use socketley_core::{ChildPolicy, RuntimeKind, RuntimeState};
use socketley_wire::Command;
use tracing::info;

use super::event::{CmdReply, ControlMsg};
use super::Engine;
use crate::registry::{ExternalInfo, RuntimeShared};
use crate::storage::Sidecars;

/// Execute one control command and answer its oneshot.
pub fn handle(engine: &mut Engine, msg: ControlMsg) {
    let ControlMsg { command, reply, session_out } = msg;
    let response = match command {
        Command::Create { kind, name, options } => create(engine, &kind, &name, &options),
        Command::Start { pattern, interactive: false } => start_many(engine, &pattern),
        Command::Start { pattern, interactive: true } => {
            start_interactive(engine, &pattern, session_out)
        }
        Command::Stop { pattern } => {
            for_each(engine, &pattern, "stopped", |engine, name| engine.stop_runtime(name))
        }
        Command::Remove { pattern } => {
            for_each(engine, &pattern, "removed", |engine, name| engine.remove_runtime(name))
        }
        Command::Send { name, text } => send(engine, &name, &text),
        Command::Edit { pattern, options } => edit(engine, &pattern, &options),
        Command::Import { path } => import(engine, &path),
        Command::Action { name, verb, args } => action(engine, &name, &verb, &args),
        Command::Reload => reload(engine),
        Command::ReloadLua => reload_hooks(engine),
        Command::Owner { child, owner, policy } => set_owner(engine, &child, &owner, &policy),
        Command::Attach { name, port, pid } => attach(engine, &name, port, pid),
        // Queries are answered in the listener.
        Command::Ls
        | Command::Ps
        | Command::Show { .. }
        | Command::Dump { .. }
        | Command::Stats { .. } => CmdReply::internal_error("query routed to the engine"),
    };
    let _ = reply.send(response);
}

fn create(
    engine: &mut Engine,
    kind: &str,
    name: &str,
    options: &[(String, String)],
) -> CmdReply {
    let kind = match RuntimeKind::from_str(kind) {
        Ok(kind) => kind,
        Err(_) => return CmdReply::user_error(format!("unknown type: {}", kind)),
    };
    let shared = match engine.ctx.registry.create(kind, name, &socketley_core::SystemClock) {
        Ok(shared) => shared,
        Err(error) => return CmdReply::user_error(error.to_string()),
    };
    for (key, value) in options {
        let applied = shared.config.lock().apply(key, value, false);
        if let Err(error) = applied {
            // Creation is atomic: a bad option undoes the insert.
            let _ = engine.ctx.registry.extract(name);
            return CmdReply::user_error(error.to_string());
        }
    }
    engine.ctx.persist(&shared);
    info!(runtime = %name, %kind, "created");
    CmdReply::ok(format!("created {}", name))
}

/// Resolve a pattern and apply `op` to every match, reporting per-name
/// failures with status 1.
fn for_each(
    engine: &mut Engine,
    pattern: &str,
    verb: &str,
    op: impl Fn(&mut Engine, &str) -> Result<(), String>,
) -> CmdReply {
    let matches = engine.ctx.registry.resolve(pattern);
    if matches.is_empty() {
        return CmdReply::user_error(format!("no such runtime: {}", pattern));
    }
    let names: Vec<String> = matches.iter().map(|shared| shared.name()).collect();
    let mut done = Vec::new();
    let mut failed = Vec::new();
    for name in names {
        match op(engine, &name) {
            Ok(()) => done.push(name),
            Err(error) => failed.push(format!("{}: {}", name, error)),
        }
    }
    if failed.is_empty() {
        CmdReply::ok(format!("{} {}", verb, done.join(" ")))
    } else {
        CmdReply::user_error(failed.join("\n"))
    }
}

fn start_many(engine: &mut Engine, pattern: &str) -> CmdReply {
    for_each(engine, pattern, "started", |engine, name| engine.start_runtime(name))
}

fn start_interactive(
    engine: &mut Engine,
    pattern: &str,
    session_out: Option<tokio::sync::mpsc::Sender<bytes::Bytes>>,
) -> CmdReply {
    let matches = engine.ctx.registry.resolve(pattern);
    if matches.len() != 1 {
        return CmdReply::user_error("interactive start needs exactly one runtime");
    }
    let Some(out) = session_out else {
        return CmdReply::internal_error("no session channel");
    };
    let name = matches[0].name();
    if matches[0].state() != RuntimeState::Running {
        if let Err(error) = engine.start_runtime(&name) {
            return CmdReply::user_error(error);
        }
    }
    match engine.register_session(&name, out) {
        Ok((rt, session)) => CmdReply {
            status: socketley_wire::CmdStatus::Ok,
            body: format!("attached {}", name),
            session: Some((rt, session)),
        },
        Err(error) => CmdReply::user_error(error),
    }
}

fn send(engine: &mut Engine, pattern: &str, text: &str) -> CmdReply {
    let matches = engine.ctx.registry.resolve(pattern);
    if matches.is_empty() {
        return CmdReply::user_error(format!("no such runtime: {}", pattern));
    }
    let mut replies = Vec::new();
    for shared in matches {
        let name = shared.name();
        match engine.runtime_input(&name, text) {
            Ok(Some(reply)) => replies.push(reply),
            Ok(None) => {}
            Err(error) => return CmdReply::user_error(format!("{}: {}", name, error)),
        }
    }
    CmdReply::ok(replies.join("\n"))
}

fn edit(engine: &mut Engine, pattern: &str, options: &[(String, String)]) -> CmdReply {
    let matches = engine.ctx.registry.resolve(pattern);
    if matches.is_empty() {
        return CmdReply::user_error(format!("no such runtime: {}", pattern));
    }

    // Renames are single-target and handled before plain keys.
    if let Some((_, new_name)) = options.iter().find(|(key, _)| key == "name") {
        if matches.len() != 1 {
            return CmdReply::user_error("rename needs exactly one runtime");
        }
        if options.len() != 1 {
            return CmdReply::user_error("rename cannot be combined with other edits");
        }
        let old = matches[0].name();
        if let Err(error) = engine.ctx.registry.rename(&old, new_name) {
            return CmdReply::user_error(error.to_string());
        }
        if let Err(error) = engine.ctx.storage.rename(&old, new_name) {
            tracing::warn!(%error, "sidecar rename failed");
        }
        engine.ctx.persist(&matches[0]);
        return CmdReply::ok(format!("renamed {} to {}", old, new_name));
    }

    for shared in &matches {
        let running = shared.state() == RuntimeState::Running;
        for (key, value) in options {
            let applied = if let Some(meta_key) = key.strip_prefix("meta.") {
                let mut meta = shared.meta.lock();
                if value.is_empty() || value == "-" {
                    meta.remove(meta_key);
                } else {
                    meta.insert(meta_key.to_string(), value.clone());
                }
                Ok(())
            } else {
                shared.config.lock().apply(key, value, running)
            };
            if let Err(error) = applied {
                return CmdReply::user_error(format!("{}: {}", shared.name(), error));
            }
        }
        if let Some(live) = engine.live_mut(&shared.id) {
            live.refresh_cfg();
        }
        engine.ctx.persist(shared);
    }
    CmdReply::ok(format!("edited {}", matches.len()))
}

fn import(engine: &mut Engine, path: &str) -> CmdReply {
    let mut spec = match Sidecars::load_file(std::path::Path::new(path)) {
        Ok(spec) => spec,
        Err(error) => return CmdReply::user_error(format!("import failed: {}", error)),
    };
    let name = spec.name.clone();
    // A copied spec file may still carry its source's id.
    if engine.ctx.registry.list().iter().any(|existing| existing.id == spec.id) {
        spec.id = socketley_core::RuntimeId::generate();
    }
    let shared = std::sync::Arc::new(RuntimeShared::from_spec(&spec));
    if let Err(error) = engine.ctx.registry.insert_restored(shared.clone()) {
        return CmdReply::user_error(error.to_string());
    }
    engine.ctx.persist(&shared);
    info!(runtime = %name, "imported");
    CmdReply::ok(format!("imported {}", name))
}

fn action(engine: &mut Engine, name: &str, verb: &str, args: &str) -> CmdReply {
    let Some(shared) = engine.ctx.registry.get(name) else {
        return CmdReply::user_error(format!("no such runtime: {}", name));
    };
    match (shared.kind, verb) {
        (RuntimeKind::Server, "broadcast") => match engine.runtime_input(name, args) {
            Ok(_) => CmdReply::ok("broadcast"),
            Err(error) => CmdReply::user_error(error),
        },
        (RuntimeKind::Client, "send") => match engine.runtime_input(name, args) {
            Ok(_) => CmdReply::ok("sent"),
            Err(error) => CmdReply::user_error(error),
        },
        (RuntimeKind::Client, "reconnect") => engine.client_reconnect_now(name),
        (RuntimeKind::Cache, "exec") => match engine.runtime_input(name, args) {
            Ok(reply) => CmdReply::ok(reply.unwrap_or_default()),
            Err(error) => CmdReply::user_error(error),
        },
        (RuntimeKind::Proxy, "check") => engine.proxy_check_now(name),
        (kind, verb) => {
            CmdReply::user_error(format!("unknown action for {}: {}", kind, verb))
        }
    }
}

/// Re-read sidecars from disk and apply them to non-running runtimes.
fn reload(engine: &mut Engine) -> CmdReply {
    let specs = engine.ctx.storage.load_all();
    let mut applied = 0;
    let mut skipped = 0;
    for spec in specs {
        match engine.ctx.registry.get(&spec.name) {
            Some(shared) if shared.state() == RuntimeState::Running => skipped += 1,
            Some(shared) => {
                *shared.config.lock() = spec.config.clone();
                *shared.meta.lock() = spec.meta.clone();
                applied += 1;
            }
            None => {
                let shared = std::sync::Arc::new(RuntimeShared::from_spec(&spec));
                if engine.ctx.registry.insert_restored(shared).is_ok() {
                    applied += 1;
                }
            }
        }
    }
    CmdReply::ok(format!("reloaded {} ({} running skipped)", applied, skipped))
}

fn reload_hooks(engine: &mut Engine) -> CmdReply {
    if engine.ctx.hooks.is_empty() {
        CmdReply::user_error("no scripting engine attached")
    } else {
        CmdReply::ok("hooks reloaded")
    }
}

fn set_owner(engine: &mut Engine, child: &str, owner: &str, policy: &Option<String>) -> CmdReply {
    let Some(shared) = engine.ctx.registry.get(child) else {
        return CmdReply::user_error(format!("no such runtime: {}", child));
    };
    if owner != "-" && engine.ctx.registry.get(owner).is_none() {
        return CmdReply::user_error(format!("no such runtime: {}", owner));
    }
    if owner == child {
        return CmdReply::user_error("a runtime cannot own itself");
    }
    let parsed_policy = match policy {
        Some(policy) => match ChildPolicy::from_str(policy) {
            Ok(policy) => Some(policy),
            Err(error) => return CmdReply::user_error(error.to_string()),
        },
        None => None,
    };
    {
        let mut config = shared.config.lock();
        config.owner = if owner == "-" { None } else { Some(owner.to_string()) };
        if let Some(policy) = parsed_policy {
            config.child_policy = policy;
        }
    }
    if let Some(live) = engine.live_mut(&shared.id) {
        live.refresh_cfg();
    }
    engine.ctx.persist(&shared);
    CmdReply::ok(format!("owner of {} set", child))
}

/// Register a foreign process: tracked in listings, no I/O ownership.
fn attach(engine: &mut Engine, name: &str, port: u16, pid: u32) -> CmdReply {
    let shared = match engine.ctx.registry.create(
        RuntimeKind::Server,
        name,
        &socketley_core::SystemClock,
    ) {
        Ok(shared) => shared,
        Err(error) => return CmdReply::user_error(error.to_string()),
    };
    *shared.external.lock() = Some(ExternalInfo { port, pid });
    shared.config.lock().port = port;
    shared.set_state(RuntimeState::Running);
    engine.ctx.persist(&shared);
    info!(runtime = %name, port, pid, "external runtime attached");
    CmdReply::ok(format!("attached {}", name))
}
