//! Shared harness: boot a daemon in-process against a temp state dir.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use socketley_daemon::engine::event::Event;
use socketley_daemon::engine::{Engine, EngineHandle};
use socketley_daemon::listener::ControlListener;
use socketley_daemon::registry::Registry;
use socketley_daemon::storage::Sidecars;
use socketley_wire::read_reply;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const IO_LIMIT: Duration = Duration::from_secs(5);

pub struct TestDaemon {
    pub socket_path: PathBuf,
    pub handle: EngineHandle,
    engine_task: JoinHandle<()>,
    listener_task: JoinHandle<()>,
}

/// Start a daemon whose state lives under `state_dir`. Restores any
/// sidecars already present (restart simulation).
pub async fn start_daemon(state_dir: &Path) -> TestDaemon {
    let registry = Arc::new(Registry::new());
    let storage = Sidecars::new(state_dir);
    let (mut engine, handle) = Engine::new(Arc::clone(&registry), storage);
    engine.restore();

    let socket_path = state_dir.join("daemon.sock");
    let _ = std::fs::remove_file(&socket_path);
    let socket = UnixListener::bind(&socket_path).expect("bind control socket");
    let listener = ControlListener::new(socket, registry, handle.clone());

    TestDaemon {
        socket_path,
        handle,
        engine_task: tokio::spawn(engine.run()),
        listener_task: tokio::spawn(listener.run()),
    }
}

impl TestDaemon {
    /// Send one control line, return (status byte, body).
    pub async fn ctl(&self, line: &str) -> (u8, String) {
        let mut stream =
            UnixStream::connect(&self.socket_path).await.expect("connect control socket");
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let (status, body) = read_reply(&mut stream, IO_LIMIT).await.expect("framed reply");
        (status.byte(), String::from_utf8_lossy(&body).into_owned())
    }

    /// Send a line and assert status 0, returning the body.
    pub async fn ok(&self, line: &str) -> String {
        let (status, body) = self.ctl(line).await;
        assert_eq!(status, 0, "command failed: {} → {}", line, body);
        body
    }

    /// Orderly engine shutdown, waiting for the loop to drain.
    pub async fn shutdown(self) {
        let _ = self.handle.events_tx.send(Event::Shutdown).await;
        let _ = timeout(IO_LIMIT, self.engine_task).await;
        self.listener_task.abort();
    }
}

/// Connect with retries: listeners come up asynchronously after `start`.
pub async fn connect_tcp(port: u16) -> TcpStream {
    let deadline = tokio::time::Instant::now() + IO_LIMIT;
    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => return stream,
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(error) => panic!("connect 127.0.0.1:{} failed: {}", port, error),
        }
    }
}

/// Read one LF-terminated line (bounded).
pub async fn recv_line(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    let result = timeout(IO_LIMIT, async {
        loop {
            match stream.read_exact(&mut byte).await {
                Ok(_) if byte[0] == b'\n' => return Ok(()),
                Ok(_) => line.push(byte[0]),
                Err(error) => return Err(error),
            }
        }
    })
    .await;
    match result {
        Ok(Ok(())) => String::from_utf8_lossy(&line).into_owned(),
        other => panic!("no line received: {:?} (so far: {:?})", other, line),
    }
}

/// Assert no bytes arrive within `ms`.
pub async fn expect_silence(stream: &mut TcpStream, ms: u64) {
    let mut byte = [0u8; 1];
    match timeout(Duration::from_millis(ms), stream.read(&mut byte)).await {
        Err(_) => {}
        Ok(Ok(0)) => {}
        Ok(other) => panic!("unexpected bytes: {:?}", other),
    }
}

/// Read until the connection closes, bounded by the I/O limit.
pub async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = timeout(IO_LIMIT, stream.read_to_end(&mut out)).await;
    out
}
