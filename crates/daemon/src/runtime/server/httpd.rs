// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static-file serving for server runtimes with a configured directory.
//!
//! Every path is percent-decoded, checked for traversal, and resolved
//! against the canonical base before a byte is read. HTML bodies get a
//! tiny WebSocket client injected so dashboard pages can talk back to
//! the same port.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::http;

/// Injected before `</head>` (or `</body>`, or appended): connects a
/// WebSocket back to the serving port and re-publishes messages as DOM
/// events.
const WS_SNIPPET: &str = "<script>(function(){var ws=new WebSocket(\"ws://\"+location.host+\"/\");\
ws.onmessage=function(e){document.dispatchEvent(new CustomEvent(\"socketley-message\",{detail:e.data}))};\
window.socketley=ws;})()</script>";

/// A server's static site: canonical base plus optional pre-built
/// responses keyed by URL path.
#[derive(Debug, Default)]
pub struct StaticSite {
    base: Option<PathBuf>,
    cache: HashMap<String, Bytes>,
}

impl StaticSite {
    /// Resolve the base directory and, when caching is on, pre-build a
    /// response for every file under it.
    pub fn build(dir: &Path, cache_enabled: bool) -> Self {
        let base = match dir.canonicalize() {
            Ok(base) => base,
            Err(error) => {
                warn!(dir = %dir.display(), %error, "static dir unusable");
                return Self::default();
            }
        };
        let mut site = Self { base: Some(base.clone()), cache: HashMap::new() };
        if cache_enabled {
            let mut files = Vec::new();
            collect_files(&base, &mut files);
            for file in files {
                if let Ok(rel) = file.strip_prefix(&base) {
                    let url = format!("/{}", rel.to_string_lossy().replace('\\', "/"));
                    if let Ok(body) = std::fs::read(&file) {
                        site.cache.insert(url, Bytes::from(build_response(&file, body)));
                    }
                }
            }
            debug!(count = site.cache.len(), "static response cache built");
        }
        site
    }

    pub fn enabled(&self) -> bool {
        self.base.is_some()
    }

    /// Serve one request path; always returns a complete HTTP response.
    pub fn serve(&self, raw_path: &str) -> Bytes {
        let Some(base) = &self.base else {
            return Bytes::from(http::not_found());
        };
        let path = raw_path.split('?').next().unwrap_or("/");
        let Some(decoded) = http::percent_decode(path) else {
            return Bytes::from(http::bad_request());
        };
        let lookup = if decoded == "/" { "/index.html".to_string() } else { decoded };

        if let Some(cached) = self.cache.get(&lookup) {
            return cached.clone();
        }

        let Some(file) = sanitize(base, &lookup) else {
            return Bytes::from(http::not_found());
        };
        match std::fs::read(&file) {
            Ok(body) => Bytes::from(build_response(&file, body)),
            Err(_) => Bytes::from(http::not_found()),
        }
    }
}

/// Resolve a decoded URL path under `base`, rejecting traversal. The
/// canonical resolution must stay inside the canonical base.
fn sanitize(base: &Path, decoded: &str) -> Option<PathBuf> {
    let rel = decoded.trim_start_matches('/');
    if rel.split('/').any(|segment| segment == "..") {
        return None;
    }
    let candidate = base.join(rel);
    let canonical = candidate.canonicalize().ok()?;
    if !canonical.starts_with(base) {
        return None;
    }
    Some(canonical)
}

fn build_response(file: &Path, body: Vec<u8>) -> Vec<u8> {
    let content_type = http::content_type_for(file);
    let body = if content_type == "text/html" { inject_snippet(body) } else { body };
    http::simple_response(200, "OK", content_type, &body)
}

/// Insert the WebSocket snippet before `</head>`, else before `</body>`,
/// else append.
pub fn inject_snippet(mut body: Vec<u8>) -> Vec<u8> {
    for marker in [&b"</head>"[..], &b"</body>"[..]] {
        if let Some(pos) = find(&body, marker) {
            let mut out = Vec::with_capacity(body.len() + WS_SNIPPET.len());
            out.extend_from_slice(&body[..pos]);
            out.extend_from_slice(WS_SNIPPET.as_bytes());
            out.extend_from_slice(&body[pos..]);
            return out;
        }
    }
    body.extend_from_slice(WS_SNIPPET.as_bytes());
    body
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

#[cfg(test)]
#[path = "httpd_tests.rs"]
mod tests;
