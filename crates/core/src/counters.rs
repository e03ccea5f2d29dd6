// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-runtime traffic counters.
//!
//! Written from the engine thread, read by status queries on other threads.
//! All loads/stores are relaxed; a snapshot across runtimes is only
//! almost-consistent, which is all the status output promises.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct Counters {
    total_connections: AtomicU64,
    current_connections: AtomicU64,
    peak_connections: AtomicU64,
    total_messages: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Counters {
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let current = self.current_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_connections.fetch_max(current, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturating: a runtime restart resets current but not total.
        let _ = self.current_connections.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| Some(n.saturating_sub(1)),
        );
    }

    pub fn message(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_in(&self, bytes: u64) {
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_out(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn current(&self) -> u64 {
        self.current_connections.load(Ordering::Relaxed)
    }

    /// Drop the live-connection count to zero (runtime stopped).
    pub fn reset_current(&self) {
        self.current_connections.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            current_connections: self.current_connections.load(Ordering::Relaxed),
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`Counters`] for serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total_connections: u64,
    pub current_connections: u64,
    pub peak_connections: u64,
    pub total_messages: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[cfg(test)]
#[path = "counters_tests.rs"]
mod tests;
