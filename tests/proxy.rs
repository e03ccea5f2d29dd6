//! Proxy engine specs: prefix rewriting, 404s, 502s, circuit breaking,
//! TCP piping.

use crate::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A one-shot HTTP backend that records the request head it saw.
async fn spawn_http_backend(port: u16) -> tokio::sync::mpsc::Receiver<String> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    match stream.read_exact(&mut byte).await {
                        Ok(_) => head.push(byte[0]),
                        Err(_) => return,
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&head).into_owned()).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nbackend",
                    )
                    .await;
            });
        }
    });
    rx
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_proxy_strips_its_name_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;
    let mut seen = spawn_http_backend(36210).await;

    daemon.ok("create proxy gw port=36211 backends=127.0.0.1:36210").await;
    daemon.ok("start gw").await;

    let mut client = connect_tcp(36211).await;
    client.write_all(b"GET /gw/api/users HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let response = read_to_end(&mut client).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK"), "got: {}", text);
    assert!(text.ends_with("backend"), "got: {}", text);

    let head = seen.recv().await.unwrap();
    assert!(head.starts_with("GET /api/users HTTP/1.1\r\n"), "backend saw: {}", head);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_prefix_is_a_404() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;
    let _seen = spawn_http_backend(36212).await;

    daemon.ok("create proxy gw port=36213 backends=127.0.0.1:36212").await;
    daemon.ok("start gw").await;

    let mut client = connect_tcp(36213).await;
    client.write_all(b"GET /other/x HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let response = read_to_end(&mut client).await;
    assert!(
        String::from_utf8_lossy(&response).starts_with("HTTP/1.1 404 Not Found"),
        "got: {}",
        String::from_utf8_lossy(&response)
    );

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bare_prefix_rewrites_to_root() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;
    let mut seen = spawn_http_backend(36214).await;

    daemon.ok("create proxy gw port=36215 backends=127.0.0.1:36214").await;
    daemon.ok("start gw").await;

    let mut client = connect_tcp(36215).await;
    client.write_all(b"GET /gw HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let _ = read_to_end(&mut client).await;
    let head = seen.recv().await.unwrap();
    assert!(head.starts_with("GET / HTTP/1.1\r\n"), "backend saw: {}", head);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_backend_yields_502() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    // Nothing listens on the backend port; retries are exhausted against
    // the same dead target.
    daemon
        .ok("create proxy gw port=36216 backends=127.0.0.1:36290 retries=0")
        .await;
    daemon.ok("start gw").await;

    let mut client = connect_tcp(36216).await;
    client.write_all(b"GET /gw/x HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let response = read_to_end(&mut client).await;
    assert!(
        String::from_utf8_lossy(&response).starts_with("HTTP/1.1 502 Bad Gateway"),
        "got: {}",
        String::from_utf8_lossy(&response)
    );

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_circuit_rejects_without_dialing() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon
        .ok("create proxy gw port=36217 backends=127.0.0.1:36291 retries=0 circuit-threshold=3 circuit-timeout=60")
        .await;
    daemon.ok("start gw").await;

    // Three failing requests trip the breaker.
    for _ in 0..3 {
        let mut client = connect_tcp(36217).await;
        client.write_all(b"GET /gw/x HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let response = read_to_end(&mut client).await;
        assert!(String::from_utf8_lossy(&response).contains("502"));
    }

    // The fourth request fails fast: no backend is available at all.
    let started = std::time::Instant::now();
    let mut client = connect_tcp(36217).await;
    client.write_all(b"GET /gw/x HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let response = read_to_end(&mut client).await;
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 502"));
    assert!(started.elapsed() < std::time::Duration::from_secs(2));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_replays_the_request_on_a_second_backend() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;
    let mut seen = spawn_http_backend(36218).await;

    // First backend is dead; the retry replays against the live one.
    daemon
        .ok("create proxy gw port=36219 backends=127.0.0.1:36292,127.0.0.1:36218 retries=2 strategy=round-robin")
        .await;
    daemon.ok("start gw").await;

    let mut client = connect_tcp(36219).await;
    client.write_all(b"GET /gw/retry HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let response = read_to_end(&mut client).await;
    assert!(
        String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200 OK"),
        "got: {}",
        String::from_utf8_lossy(&response)
    );
    let head = seen.recv().await.unwrap();
    assert!(head.starts_with("GET /retry HTTP/1.1\r\n"), "backend saw: {}", head);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_mode_pipes_bidirectionally() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    // Raw echo backend.
    let backend = TcpListener::bind(("127.0.0.1", 36220)).await.unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = backend.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    daemon
        .ok("create proxy tun port=36221 proxy-mode=tcp backends=127.0.0.1:36220")
        .await;
    daemon.ok("start tun").await;

    let mut client = connect_tcp(36221).await;
    client.write_all(b"anything goes\n").await.unwrap();
    assert_eq!(recv_line(&mut client).await, "anything goes");
    client.write_all(b"still here\n").await.unwrap();
    assert_eq!(recv_line(&mut client).await, "still here");

    daemon.shutdown().await;
}
