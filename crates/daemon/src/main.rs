// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! socketleyd: the Socketley supervisor daemon.

use socketley_daemon::boot::BootConfig;
use socketley_daemon::engine::event::Event;
use socketley_daemon::lifecycle::{startup, LifecycleError, Paths};
use socketley_daemon::listener::ControlListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("socketleyd: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LifecycleError> {
    let paths = Paths::load()?;
    let boot = match &paths.config_path {
        Some(path) => BootConfig::load(path)?,
        None => BootConfig::default(),
    };

    // Log to the daemon log file; RUST_LOG and SOCKETLEY_LOG_STDERR
    // override the boot-config level and destination.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(boot.log_level.as_filter()));
    let _guard = if std::env::var("SOCKETLEY_LOG_STDERR").is_ok() {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        None
    } else {
        std::fs::create_dir_all(&paths.state_dir)?;
        let appender = tracing_appender::rolling::never(
            &paths.state_dir,
            paths.log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("daemon.log")),
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).init();
        Some(guard)
    };

    if let Some(port) = boot.metrics_port {
        // The metrics endpoint is an external collaborator; the core only
        // records the configuration for it.
        info!(port, "metrics port configured (no endpoint in core)");
    }

    let result = startup(paths)?;
    let daemon = result.daemon;
    let handle = result.handle;

    let listener =
        ControlListener::new(result.socket, daemon.registry.clone(), handle.clone());
    tokio::spawn(listener.run());
    spawn_signal_tasks(handle.clone());

    // Parent scripts wait for this line.
    println!("READY");

    result.engine.run().await;
    daemon.shutdown();
    Ok(())
}

/// INT/TERM/HUP wake the engine loop with a shutdown event; SIGPIPE is
/// drained so broken pipes surface as EPIPE on completions instead.
fn spawn_signal_tasks(handle: socketley_daemon::engine::EngineHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    for kind in [SignalKind::interrupt(), SignalKind::terminate(), SignalKind::hangup()] {
        let events_tx = handle.events_tx.clone();
        tokio::spawn(async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    let _ = events_tx.send(Event::Shutdown).await;
                }
                Err(error) => error!(%error, "failed to install signal handler"),
            }
        });
    }

    tokio::spawn(async move {
        match signal(SignalKind::pipe()) {
            Ok(mut stream) => loop {
                if stream.recv().await.is_none() {
                    return;
                }
            },
            Err(error) => error!(%error, "failed to ignore SIGPIPE"),
        }
    });
}
