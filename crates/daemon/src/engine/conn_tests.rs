// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn test_conn(queue: usize) -> (Connection, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(queue);
    let conn = Connection::new(
        ConnId(1),
        None,
        tx,
        CancellationToken::new(),
        CancellationToken::new(),
        0,
        Instant::now(),
        ConnRole::Peer,
    );
    (conn, rx)
}

#[test]
fn push_write_reports_overflow_at_cap() {
    let (mut conn, _rx) = test_conn(2);
    assert!(conn.push_write(Bytes::from_static(b"a")));
    assert!(conn.push_write(Bytes::from_static(b"b")));
    // Queue full: caller must close.
    assert!(!conn.push_write(Bytes::from_static(b"c")));
}

#[test]
fn push_after_close_is_swallowed() {
    let (mut conn, _rx) = test_conn(2);
    conn.begin_close(true);
    assert!(conn.push_write(Bytes::from_static(b"late")));
}

#[test]
fn begin_close_cancels_reader_and_ends_queue() {
    let (mut conn, mut rx) = test_conn(4);
    assert!(conn.push_write(Bytes::from_static(b"queued")));
    conn.begin_close(true);

    assert!(conn.closing);
    assert!(conn.cancel_read.is_cancelled());
    // Drain close: writer not aborted, queued data still readable.
    assert!(!conn.cancel_write.is_cancelled());
    assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"queued"));
    // Sender dropped → queue ends after the flush.
    assert!(rx.try_recv().is_err());
}

#[test]
fn abort_close_cancels_writer_too() {
    let (mut conn, _rx) = test_conn(4);
    conn.begin_close(false);
    assert!(conn.cancel_write.is_cancelled());
}

#[test]
fn released_only_when_both_halves_reported() {
    let (mut conn, _rx) = test_conn(1);
    assert!(!conn.is_released());
    conn.read_open = false;
    assert!(!conn.is_released());
    conn.write_open = false;
    assert!(conn.is_released());
}
