// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn site_with(files: &[(&str, &str)], cached: bool) -> (tempfile::TempDir, StaticSite) {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    let site = StaticSite::build(dir.path(), cached);
    (dir, site)
}

fn body_of(response: &[u8]) -> &[u8] {
    let pos = response.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    &response[pos + 4..]
}

fn status_of(response: &[u8]) -> &[u8] {
    &response[..response.iter().position(|b| *b == b'\r').unwrap()]
}

#[test]
fn serves_files_and_maps_root_to_index() {
    let (_dir, site) = site_with(&[("index.html", "<html><head></head></html>"), ("app.js", "x=1")], false);
    assert_eq!(status_of(&site.serve("/app.js")), b"HTTP/1.1 200 OK");
    assert_eq!(status_of(&site.serve("/")), b"HTTP/1.1 200 OK");
    assert_eq!(status_of(&site.serve("/missing.css")), b"HTTP/1.1 404 Not Found");
}

#[test]
fn html_gets_the_websocket_snippet_before_head_close() {
    let (_dir, site) = site_with(&[("index.html", "<html><head></head><body></body></html>")], false);
    let body = body_of(&site.serve("/index.html")).to_vec();
    let text = String::from_utf8(body).unwrap();
    let script = text.find("<script>").unwrap();
    let head_close = text.find("</head>").unwrap();
    assert!(script < head_close);
}

#[test]
fn non_html_is_untouched() {
    let (_dir, site) = site_with(&[("app.js", "var x = 1;")], false);
    assert_eq!(body_of(&site.serve("/app.js")), b"var x = 1;");
}

#[test]
fn traversal_and_nul_are_rejected() {
    let (_dir, site) = site_with(&[("index.html", "x"), ("sub/page.html", "y")], false);
    assert_eq!(status_of(&site.serve("/../etc/passwd")), b"HTTP/1.1 404 Not Found");
    assert_eq!(status_of(&site.serve("/sub/../../escape")), b"HTTP/1.1 404 Not Found");
    // Encoded traversal decodes to ".." and is rejected the same way.
    assert_eq!(status_of(&site.serve("/%2e%2e/etc/passwd")), b"HTTP/1.1 404 Not Found");
    assert_eq!(status_of(&site.serve("/nul%00byte")), b"HTTP/1.1 400 Bad Request");
}

#[test]
fn nested_paths_and_query_strings() {
    let (_dir, site) = site_with(&[("sub/page.html", "<html></html>")], false);
    assert_eq!(status_of(&site.serve("/sub/page.html?v=2")), b"HTTP/1.1 200 OK");
}

#[test]
fn cached_site_serves_prebuilt_responses() {
    let (dir, site) = site_with(&[("index.html", "<html></html>"), ("a/b.txt", "deep")], true);
    // Delete the files: cached responses must still serve.
    std::fs::remove_file(dir.path().join("index.html")).unwrap();
    std::fs::remove_file(dir.path().join("a/b.txt")).unwrap();
    assert_eq!(status_of(&site.serve("/index.html")), b"HTTP/1.1 200 OK");
    assert_eq!(body_of(&site.serve("/a/b.txt")), b"deep");
}

#[test]
fn snippet_injection_fallbacks() {
    let with_body = inject_snippet(b"<html><body>x</body></html>".to_vec());
    let text = String::from_utf8(with_body).unwrap();
    assert!(text.find("<script>").unwrap() < text.find("</body>").unwrap());

    let bare = inject_snippet(b"no markers".to_vec());
    assert!(String::from_utf8(bare).unwrap().ends_with("</script>"));
}

#[test]
fn missing_base_directory_is_disabled() {
    let site = StaticSite::build(std::path::Path::new("/definitely/not/here"), true);
    assert!(!site.enabled());
    assert_eq!(status_of(&site.serve("/x")), b"HTTP/1.1 404 Not Found");
}
