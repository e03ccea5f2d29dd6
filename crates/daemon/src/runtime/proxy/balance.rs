// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend table: health state, circuit breakers, selection strategies.

use std::time::{Duration, Instant};

use rand::Rng as _;
use socketley_core::SelectStrategy;

/// Circuit breaker per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    /// Half-open admits exactly one trial request.
    probe_inflight: bool,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self { state: CircuitState::Closed, failures: 0, opened_at: None, probe_inflight: false }
    }
}

impl CircuitBreaker {
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Connect or forwarding error. Reaching the threshold opens the
    /// circuit; a half-open trial failure reopens it and restarts the
    /// timer.
    pub fn record_failure(&mut self, now: Instant, threshold: u32) {
        self.failures += 1;
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                self.probe_inflight = false;
            }
            CircuitState::Closed if threshold > 0 && self.failures >= threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            }
            _ => {}
        }
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.opened_at = None;
        self.probe_inflight = false;
    }

    /// Selection-time check. Moves open→half-open once the timeout has
    /// elapsed; while half-open only the single trial request passes.
    pub fn usable(&mut self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                match self.opened_at {
                    Some(at) if now.saturating_duration_since(at) >= timeout => {
                        self.state = CircuitState::HalfOpen;
                        self.probe_inflight = false;
                        true
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => !self.probe_inflight,
        }
    }

    /// A request was dispatched to this backend while half-open.
    pub fn note_dispatch(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probe_inflight = true;
        }
    }
}

/// Health-check state per backend.
#[derive(Debug)]
pub struct Health {
    pub healthy: bool,
    pub consecutive_failures: u32,
}

impl Default for Health {
    fn default() -> Self {
        Self { healthy: true, consecutive_failures: 0 }
    }
}

impl Health {
    /// Apply one probe verdict. Any success restores health and clears
    /// the counter; consecutive failures at the threshold flip unhealthy.
    pub fn record_probe(&mut self, ok: bool, threshold: u32) {
        if ok {
            self.healthy = true;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= threshold.max(1) {
                self.healthy = false;
            }
        }
    }
}

/// One backend slot.
#[derive(Debug)]
pub struct Backend {
    /// Original entry: `host:port`, a runtime name, or `group:<label>`.
    pub entry: String,
    pub health: Health,
    pub circuit: CircuitBreaker,
}

impl Backend {
    pub fn new(entry: &str) -> Self {
        Self { entry: entry.to_string(), health: Health::default(), circuit: CircuitBreaker::default() }
    }
}

/// Pick a backend index. `exclude` lists backends already tried for this
/// request. The hook verdict wins when it names an available backend;
/// otherwise the strategy applies over the available set.
#[allow(clippy::too_many_arguments)]
pub fn select(
    backends: &mut [Backend],
    strategy: SelectStrategy,
    rr: &mut usize,
    exclude: &[usize],
    now: Instant,
    circuit_timeout: Duration,
    hook_choice: Option<usize>,
) -> Option<usize> {
    let mut available: Vec<usize> = Vec::new();
    for (index, backend) in backends.iter_mut().enumerate() {
        if !exclude.contains(&index)
            && backend.health.healthy
            && backend.circuit.usable(now, circuit_timeout)
        {
            available.push(index);
        }
    }
    if available.is_empty() {
        return None;
    }

    let choice = match hook_choice {
        Some(index) if available.contains(&index) => index,
        _ => match strategy {
            SelectStrategy::RoundRobin => {
                let index = available[*rr % available.len()];
                *rr = rr.wrapping_add(1);
                index
            }
            SelectStrategy::Random => {
                available[rand::thread_rng().gen_range(0..available.len())]
            }
        },
    };
    backends[choice].circuit.note_dispatch();
    Some(choice)
}

/// Resolve a backend entry to a connectable address. Runtime names map to
/// that runtime's loopback port through the registry; `group:` labels need
/// the discovery collaborator, which is not wired into the core.
pub fn resolve_entry(registry: &crate::registry::Registry, entry: &str) -> Option<String> {
    if let Some(label) = entry.strip_prefix("group:") {
        tracing::debug!(label, "group backend needs discovery, treating as unavailable");
        return None;
    }
    if entry.contains(':') {
        return Some(entry.to_string());
    }
    let shared = registry.get(entry)?;
    let port = shared.config.lock().port;
    if port == 0 {
        return None;
    }
    Some(format!("127.0.0.1:{}", port))
}

#[cfg(test)]
#[path = "balance_tests.rs"]
mod tests;
