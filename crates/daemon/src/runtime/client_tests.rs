// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn backoff_grows_then_caps() {
    for attempt in 0..12 {
        let delay = backoff_delay(attempt);
        let base = Duration::from_secs((1u64 << attempt.min(4)).min(30));
        assert!(delay >= base, "attempt {}: {:?} < {:?}", attempt, delay, base);
        assert!(delay < base + Duration::from_millis(500));
    }
    // Ceiling: attempt 4 and beyond share the 16s base, capped at 30s.
    assert!(backoff_delay(100) < Duration::from_secs(31));
}

#[test]
fn drain_lines_splits_trims_and_skips_empty() {
    use crate::engine::conn::{ConnRole, Connection};
    use std::collections::HashMap;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    let (tx, _rx) = tokio::sync::mpsc::channel(4);
    let mut conns = HashMap::new();
    let mut conn = Connection::new(
        ConnId(1),
        None,
        tx,
        CancellationToken::new(),
        CancellationToken::new(),
        0,
        Instant::now(),
        ConnRole::ClientMain,
    );
    conn.acc.extend_from_slice(b"one\r\ntwo\n\npartial");
    conns.insert(ConnId(1), conn);

    let lines = drain_lines(&mut conns, ConnId(1));
    assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    // The partial tail stays buffered.
    assert_eq!(&conns.get(&ConnId(1)).unwrap().acc[..], b"partial");

    // Completing the line drains it.
    conns.get_mut(&ConnId(1)).unwrap().acc.extend_from_slice(b"\n");
    assert_eq!(drain_lines(&mut conns, ConnId(1)), vec!["partial".to_string()]);
}
