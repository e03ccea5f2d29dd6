// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use socketley_core::{RuntimeConfig, RuntimeKind};

#[test]
fn request_line_waits_for_crlf() {
    assert!(request_line(b"GET /gw/api HTTP/1.1").is_none());
    let (method, path, version, len) =
        request_line(b"GET /gw/api HTTP/1.1\r\nHost: x\r\n").unwrap().unwrap();
    assert_eq!(method, "GET");
    assert_eq!(path, "/gw/api");
    assert_eq!(version, "HTTP/1.1");
    assert_eq!(len, "GET /gw/api HTTP/1.1\r\n".len());
}

#[test]
fn request_line_rejects_garbage() {
    assert!(request_line(b"NOT A REQUEST LINE AT ALL\r\n").unwrap().is_err());
    assert!(request_line(b"GET nopath HTTP/1.1\r\n").unwrap().is_err());
}

#[test]
fn prefix_stripping() {
    assert_eq!(strip_prefix("/gw/api/users", "gw").unwrap(), "/api/users");
    assert_eq!(strip_prefix("/gw", "gw").unwrap(), "/");
    assert_eq!(strip_prefix("/gw/", "gw").unwrap(), "/");
    // Other prefixes 404.
    assert!(strip_prefix("/other/x", "gw").is_none());
    // Prefix must be a whole path segment.
    assert!(strip_prefix("/gwx/api", "gw").is_none());
}

#[test]
fn idempotent_methods() {
    for method in ["GET", "HEAD", "OPTIONS", "TRACE", "PUT", "DELETE"] {
        assert!(idempotent(method), "{}", method);
    }
    assert!(!idempotent("POST"));
    assert!(!idempotent("PATCH"));
}

#[test]
fn saved_request_stops_growing_at_cap() {
    let mut state = ProxyClientState::new(1);
    state.saved_request = Some(Vec::new());
    append_saved(&mut state, &[b'a'; SAVED_REQUEST_CAP - 10]);
    assert!(state.saved_request.is_some());
    // Crossing the cap disables replay entirely.
    append_saved(&mut state, &[b'b'; 11]);
    assert!(state.saved_request.is_none());
}

#[test]
fn saved_request_untouched_after_response_starts() {
    let mut state = ProxyClientState::new(1);
    state.saved_request = Some(b"request".to_vec());
    state.response_started = true;
    append_saved(&mut state, b"more");
    assert_eq!(state.saved_request.as_deref(), Some(&b"request"[..]));
}

#[test]
fn proxy_state_builds_backend_table_from_config() {
    let mut cfg = RuntimeConfig::new(RuntimeKind::Proxy);
    cfg.apply("backends", "127.0.0.1:9000,b2,group:blue", false).unwrap();
    let state = ProxyState::new(&cfg);
    assert_eq!(state.backends.len(), 3);
    assert_eq!(state.backends[0].entry, "127.0.0.1:9000");
    assert!(state.backends.iter().all(|b| b.health.healthy));
}
