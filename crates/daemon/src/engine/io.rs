// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! I/O submissions.
//!
//! Each function here is one "submit": it spawns a task that performs the
//! operation and reports the completion as a tagged [`Event`]. Handlers on
//! the engine loop never touch sockets directly; they submit through
//! these functions and return.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use socketley_core::runtime::{ACCEPT_BACKOFF_MS, WRITE_BATCH, WRITE_QUEUE_CAP};
use socketley_core::RuntimeId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::event::{ConnId, ConnectTarget, Event, TimerKind};

/// Read chunk size for connection readers, the provided-buffer analog:
/// one reusable buffer per reader, frozen slices handed to the loop.
const READ_CHUNK: usize = 8 * 1024;

/// Bind a TCP listener with REUSEADDR/REUSEPORT.
pub fn listen_tcp(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

/// Bind a UDP socket with REUSEADDR.
pub fn bind_udp(port: u16) -> std::io::Result<UdpSocket> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Multishot accept: one submission that keeps completing until cancelled.
/// Accept errors back off before resubmitting so an fd-exhausted process
/// does not spin.
pub fn spawn_accept(
    listener: TcpListener,
    tx: mpsc::Sender<Event>,
    rt: RuntimeId,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        if tx.send(Event::Accepted { rt: rt.clone(), stream, peer }).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        if tx.send(Event::AcceptError { rt: rt.clone(), error }).await.is_err() {
                            return;
                        }
                        sleep(Duration::from_millis(ACCEPT_BACKOFF_MS)).await;
                    }
                },
            }
        }
    });
}

/// Continuous read submission for one connection. Every chunk is one
/// completion; EOF, error and cancellation all end in a single terminal
/// `ReadClosed`.
pub fn spawn_reader(
    mut half: OwnedReadHalf,
    tx: mpsc::Sender<Event>,
    rt: RuntimeId,
    conn: ConnId,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            buf.reserve(READ_CHUNK);
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.send(Event::ReadClosed { rt, conn, error: None }).await;
                    return;
                }
                result = half.read_buf(&mut buf) => match result {
                    Ok(0) => {
                        let _ = tx.send(Event::ReadClosed { rt, conn, error: None }).await;
                        return;
                    }
                    Ok(_) => {
                        let data = buf.split().freeze();
                        if tx.send(Event::ConnData { rt: rt.clone(), conn, data }).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(Event::ReadClosed { rt, conn, error: Some(error) }).await;
                        return;
                    }
                },
            }
        }
    });
}

/// Writer task owning a connection's ordered write queue. Drains up to
/// [`WRITE_BATCH`] queued blobs per wake. The queue ending (sender
/// dropped) is the drain-close; cancellation is the abort-close. Either
/// way the socket write side is shut down before the terminal event.
pub fn spawn_writer(
    mut half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    tx: mpsc::Sender<Event>,
    rt: RuntimeId,
    conn: ConnId,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut error: Option<std::io::Error> = None;
        'outer: loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                blob = rx.recv() => match blob {
                    Some(blob) => blob,
                    None => break 'outer,
                },
            };
            let mut batch = Vec::with_capacity(4);
            batch.push(first);
            while batch.len() < WRITE_BATCH {
                match rx.try_recv() {
                    Ok(blob) => batch.push(blob),
                    Err(_) => break,
                }
            }
            for blob in &batch {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    result = half.write_all(blob) => {
                        if let Err(e) = result {
                            error = Some(e);
                            break 'outer;
                        }
                    }
                }
            }
        }
        let _ = half.shutdown().await;
        let _ = tx.send(Event::WriteClosed { rt, conn, error }).await;
    });
}

/// Open a connection's write queue at the standard cap.
pub fn write_queue() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(WRITE_QUEUE_CAP)
}

/// One-datagram-at-a-time receive loop for a UDP runtime.
pub fn spawn_udp_recv(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<Event>,
    rt: RuntimeId,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => {
                        let data = Bytes::copy_from_slice(&buf[..len]);
                        if tx.send(Event::Datagram { rt: rt.clone(), peer, data }).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => sleep(Duration::from_millis(ACCEPT_BACKOFF_MS)).await,
                },
            }
        }
    });
}

/// Non-blocking connect submission. `cached` skips resolution; the
/// completion carries the address that was used so the caller can manage
/// its resolution cache.
pub fn spawn_connect(
    tx: mpsc::Sender<Event>,
    rt: RuntimeId,
    target: ConnectTarget,
    addr: String,
    cached: Option<SocketAddr>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let attempt = async {
            let resolved = match cached {
                Some(addr) => addr,
                None => lookup_host(addr.as_str()).await?.next().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no address for host")
                })?,
            };
            let stream = TcpStream::connect(resolved).await?;
            Ok::<_, std::io::Error>((stream, resolved))
        };
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = attempt => {
                let event = match result {
                    Ok((stream, resolved)) => Event::Connected {
                        rt,
                        target,
                        result: Ok(stream),
                        resolved: Some(resolved),
                    },
                    Err(error) => Event::Connected { rt, target, result: Err(error), resolved: None },
                };
                let _ = tx.send(event).await;
            }
        }
    });
}

/// Timeout submission: fires once, unless cancelled first.
pub fn spawn_timer(
    tx: mpsc::Sender<Event>,
    rt: Option<RuntimeId>,
    kind: TimerKind,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = sleep(delay) => {
                let _ = tx.send(Event::Timer { rt, kind }).await;
            }
        }
    });
}

/// Health probe: TCP connect, optionally followed by an HTTP GET that must
/// answer 2xx. Probes time out after five seconds.
pub fn spawn_probe(
    tx: mpsc::Sender<Event>,
    rt: RuntimeId,
    backend: usize,
    addr: String,
    http_path: Option<String>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let check = async {
            let mut stream = TcpStream::connect(addr.as_str()).await?;
            let Some(path) = http_path else {
                return Ok::<_, std::io::Error>(true);
            };
            let request =
                format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", path, addr);
            stream.write_all(request.as_bytes()).await?;
            let mut head = [0u8; 64];
            let len = stream.read(&mut head).await?;
            Ok(is_http_2xx(&head[..len]))
        };
        let healthy = tokio::select! {
            _ = cancel.cancelled() => return,
            result = timeout(Duration::from_secs(5), check) => {
                matches!(result, Ok(Ok(true)))
            }
        };
        let _ = tx.send(Event::Probe { rt, backend, healthy }).await;
    });
}

/// `HTTP/1.x 2..` status-line check.
fn is_http_2xx(head: &[u8]) -> bool {
    if !head.starts_with(b"HTTP/1.") {
        return false;
    }
    // "HTTP/1.1 " is 9 bytes; the status code follows.
    head.get(9).map(|b| *b == b'2').unwrap_or(false)
}

#[cfg(test)]
#[path = "io_tests.rs"]
mod tests;
