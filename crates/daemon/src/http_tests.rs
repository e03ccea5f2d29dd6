// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn head_is_incomplete_until_blank_line() {
    assert!(parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n").is_none());
    let head = parse_head(b"GET /a/b HTTP/1.1\r\nHost: x\r\n\r\nrest").unwrap().unwrap();
    assert_eq!(head.method, "GET");
    assert_eq!(head.path, "/a/b");
    assert_eq!(head.version, "HTTP/1.1");
    assert_eq!(head.header("host"), Some("x"));
    assert_eq!(head.head_len, "GET /a/b HTTP/1.1\r\nHost: x\r\n\r\n".len());
}

#[test]
fn header_names_are_lowercased_and_values_trimmed() {
    let head =
        parse_head(b"GET / HTTP/1.1\r\nX-Thing:  spaced value \r\n\r\n").unwrap().unwrap();
    assert_eq!(head.header("x-thing"), Some("spaced value"));
}

#[test]
fn malformed_heads_are_errors() {
    assert!(parse_head(b"GARBAGE\r\n\r\n").unwrap().is_err());
    assert!(parse_head(b"GET nopath HTTP/1.1\r\n\r\n").unwrap().is_err());
    assert!(parse_head(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n").unwrap().is_err());
}

#[test]
fn websocket_upgrade_detection() {
    let head = parse_head(
        b"GET /chat HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\nUpgrade: websocket\r\n\r\n",
    )
    .unwrap()
    .unwrap();
    assert!(head.is_websocket_upgrade());

    let plain = parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap().unwrap();
    assert!(!plain.is_websocket_upgrade());
}

#[test]
fn percent_decoding() {
    assert_eq!(percent_decode("/a%20b").unwrap(), "/a b");
    assert_eq!(percent_decode("/plain").unwrap(), "/plain");
    assert!(percent_decode("/bad%2").is_none());
    assert!(percent_decode("/bad%zz").is_none());
    // NUL is always rejected.
    assert!(percent_decode("/nul%00").is_none());
}

#[test]
fn simple_response_has_content_length() {
    let bytes = simple_response(200, "OK", "text/plain", b"hello");
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.ends_with("\r\n\r\nhello"));
}

#[test]
fn content_types_by_extension() {
    use std::path::Path;
    assert_eq!(content_type_for(Path::new("index.html")), "text/html");
    assert_eq!(content_type_for(Path::new("app.js")), "application/javascript");
    assert_eq!(content_type_for(Path::new("blob.bin")), "application/octet-stream");
}
