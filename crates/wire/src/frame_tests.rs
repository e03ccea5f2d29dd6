// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Cursor;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn reply_roundtrip() {
    let mut buffer = Vec::new();
    write_reply(&mut buffer, CmdStatus::Ok, b"created web", LIMIT).await.unwrap();
    assert_eq!(buffer[0], 0);
    assert_eq!(*buffer.last().unwrap(), 0);

    let mut cursor = Cursor::new(buffer);
    let (status, body) = read_reply(&mut cursor, LIMIT).await.unwrap();
    assert_eq!(status, CmdStatus::Ok);
    assert_eq!(body, b"created web");
}

#[tokio::test]
async fn error_status_roundtrip() {
    let mut buffer = Vec::new();
    write_reply(&mut buffer, CmdStatus::UserError, b"no such runtime: x", LIMIT).await.unwrap();
    let (status, body) = read_reply(&mut Cursor::new(buffer), LIMIT).await.unwrap();
    assert_eq!(status, CmdStatus::UserError);
    assert_eq!(body, b"no such runtime: x");
}

#[tokio::test]
async fn read_reply_rejects_unknown_status() {
    let err = read_reply(&mut Cursor::new(vec![9u8, 0u8]), LIMIT).await.unwrap_err();
    assert!(matches!(err, ProtocolError::BadStatus(9)));
}

#[tokio::test]
async fn read_reply_on_eof_is_connection_closed() {
    let err = read_reply(&mut Cursor::new(Vec::new()), LIMIT).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn read_line_strips_cr_and_lf() {
    let mut cursor = Cursor::new(b"ls\r\nps\n".to_vec());
    assert_eq!(read_line(&mut cursor, 1024).await.unwrap(), Some("ls".to_string()));
    assert_eq!(read_line(&mut cursor, 1024).await.unwrap(), Some("ps".to_string()));
    assert_eq!(read_line(&mut cursor, 1024).await.unwrap(), None);
}

#[tokio::test]
async fn read_line_enforces_length_cap() {
    let long = vec![b'a'; 64];
    let mut cursor = Cursor::new(long);
    let err = read_line(&mut cursor, 16).await.unwrap_err();
    assert!(matches!(err, ProtocolError::LineTooLong(16)));
}

#[tokio::test]
async fn truncated_line_is_an_error() {
    // Bytes but no LF and then EOF: not a clean close.
    let mut cursor = Cursor::new(b"partial".to_vec());
    let err = read_line(&mut cursor, 1024).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}
