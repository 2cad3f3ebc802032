// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level server runner — shared by `main` and the end-to-end tests.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::broadcast;
use crate::config::Config;
use crate::docker::{BollardDocker, DockerApi};
use crate::handlers;
use crate::socket::build_router;
use crate::state::Core;
use crate::store::Store;
use crate::updates;
use crate::watch;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / STEVEDORE_LOG_LEVEL > RUST_LOG > "info".
    let filter = if std::env::var("STEVEDORE_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the server until shutdown. Returns an error (and a non-zero exit)
/// when the daemon event stream cannot be sustained.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    config.validate()?;

    let shutdown = CancellationToken::new();
    tokio::fs::create_dir_all(&config.stacks_dir).await?;

    let store = Store::open(&config.data_dir).await?;
    // Mock mode runs without a daemon; queries return empty state and the
    // event stream idles instead of failing into reconnect backoff.
    let docker: Arc<dyn DockerApi> = if config.mock_compose {
        Arc::new(crate::docker::mock::MockDocker::new())
    } else {
        Arc::new(BollardDocker::connect()?)
    };
    let core = Core::new(config.clone(), store, docker, shutdown.clone());
    handlers::register_all(&core.socket);

    // Long-lived tasks: fs watcher, update scheduler, daemon event loop.
    watch::spawn_watcher(Arc::clone(&core));
    tokio::spawn(updates::run_scheduler(Arc::clone(&core)));
    let event_loop = tokio::spawn(broadcast::run_event_loop(Arc::clone(&core)));

    spawn_signal_handler(shutdown.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("stevedore listening on {}", listener.local_addr()?);
    let router = build_router(Arc::clone(&core));
    let server = tokio::spawn(async move {
        let result =
            axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
        if let Err(e) = result {
            error!("server error: {e}");
        }
    });

    let outcome = tokio::select! {
        _ = core.shutdown.cancelled() => Ok(()),
        result = event_loop => match result {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("event loop task failed: {e}")),
        },
    };

    core.shutdown.cancel();
    core.broadcast.debouncer.stop();
    let _ = server.await;
    outcome
}

/// First SIGTERM/SIGINT shuts down gracefully; a second one forces exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {}
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {}
        }
        std::process::exit(130);
    });
}
