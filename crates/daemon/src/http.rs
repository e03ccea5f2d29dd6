// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal HTTP/1.1 request-head parsing shared by the server and proxy
//! engines. Handles exactly what the daemon needs: request line, headers,
//! percent-decoding. Bodies are opaque bytes to both engines.

use std::collections::HashMap;

/// End-of-head marker offset, if the head is complete.
pub fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Parsed request head. Header names are lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    /// Byte length of the head including the blank line.
    pub head_len: usize,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// True when the head carries a `Connection: upgrade` +
    /// `Upgrade: websocket` pair.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        let connection = self
            .header("connection")
            .map(|v| v.to_ascii_lowercase().contains("upgrade"))
            .unwrap_or(false);
        upgrade && connection
    }
}

/// Parse a complete request head out of `buf`. Returns `None` until the
/// double-CRLF arrives; malformed heads return `Some(Err(()))` so callers
/// can close the connection.
#[allow(clippy::result_unit_err)]
pub fn parse_head(buf: &[u8]) -> Option<Result<RequestHead, ()>> {
    let head_len = head_end(buf)?;
    let text = match std::str::from_utf8(&buf[..head_len - 4]) {
        Ok(text) => text,
        Err(_) => return Some(Err(())),
    };
    let mut lines = text.split("\r\n");
    let request_line = match lines.next() {
        Some(line) => line,
        None => return Some(Err(())),
    };
    let mut parts = request_line.split(' ');
    let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v)) if !m.is_empty() && p.starts_with('/') => {
            (m.to_string(), p.to_string(), v.to_string())
        }
        _ => return Some(Err(())),
    };

    // Single pass over the header block.
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
            None => return Some(Err(())),
        }
    }
    Some(Ok(RequestHead { method, path, version, headers, head_len }))
}

/// Percent-decode a URL path. Rejects NUL and malformed escapes.
pub fn percent_decode(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let high = (hex[0] as char).to_digit(16)?;
                let low = (hex[1] as char).to_digit(16)?;
                out.push((high * 16 + low) as u8);
                i += 3;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    if out.contains(&0) {
        return None;
    }
    String::from_utf8(out).ok()
}

/// Render a simple response with a text body.
pub fn simple_response(status: u16, reason: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Canned error responses.
pub fn not_found() -> Vec<u8> {
    simple_response(404, "Not Found", "text/plain", b"404 Not Found")
}

pub fn bad_gateway() -> Vec<u8> {
    simple_response(502, "Bad Gateway", "text/plain", b"502 Bad Gateway")
}

pub fn bad_request() -> Vec<u8> {
    simple_response(400, "Bad Request", "text/plain", b"400 Bad Request")
}

/// Guess a content type from the file extension.
pub fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
