// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook slots for the scripting collaborator.
//!
//! The core exposes named callback slots; whether a slot is filled by a
//! scripting runtime or by native code is outside the core's concern.
//! Hooks run on the engine thread and must not block.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Context handed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookCtx {
    pub runtime: String,
    pub peer: Option<SocketAddr>,
}

pub type AuthHook = Box<dyn Fn(&HookCtx) -> bool + Send>;
pub type ConnHook = Box<dyn Fn(&HookCtx) + Send>;
/// May rewrite the message; `None` keeps it unchanged.
pub type MessageHook = Box<dyn Fn(&HookCtx, &str) -> Option<String> + Send>;
/// Returns a backend index; `None` falls through to the strategy.
pub type RouteHook = Box<dyn Fn(&str, &str) -> Option<usize> + Send>;
/// Master-auth check used when no static secret is configured.
pub type MasterCheckHook = Box<dyn Fn(&HookCtx, &str) -> bool + Send>;
pub type ExpireHook = Box<dyn Fn(&str) + Send>;

/// Per-runtime hook slots; every slot defaults to empty.
#[derive(Default)]
pub struct Hooks {
    pub on_auth: Option<AuthHook>,
    pub on_connect: Option<ConnHook>,
    pub on_disconnect: Option<ConnHook>,
    pub on_message: Option<MessageHook>,
    pub on_route: Option<RouteHook>,
    pub on_master_check: Option<MasterCheckHook>,
    pub on_expire: Option<ExpireHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots: Vec<&str> = [
            ("on_auth", self.on_auth.is_some()),
            ("on_connect", self.on_connect.is_some()),
            ("on_disconnect", self.on_disconnect.is_some()),
            ("on_message", self.on_message.is_some()),
            ("on_route", self.on_route.is_some()),
            ("on_master_check", self.on_master_check.is_some()),
            ("on_expire", self.on_expire.is_some()),
        ]
        .iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| *name)
        .collect();
        write!(f, "Hooks({})", slots.join(","))
    }
}

/// Hook sets keyed by runtime name, installed before the engine starts or
/// swapped by the scripting collaborator on reload.
#[derive(Debug, Default)]
pub struct HookRegistry {
    by_runtime: HashMap<String, Hooks>,
}

impl HookRegistry {
    pub fn install(&mut self, runtime: impl Into<String>, hooks: Hooks) {
        self.by_runtime.insert(runtime.into(), hooks);
    }

    pub fn get(&self, runtime: &str) -> Option<&Hooks> {
        self.by_runtime.get(runtime)
    }

    pub fn remove(&mut self, runtime: &str) {
        self.by_runtime.remove(runtime);
    }

    pub fn is_empty(&self) -> bool {
        self.by_runtime.is_empty()
    }
}
