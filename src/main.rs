//! parley server binary
//!
//! Wires the room hub to an HTTP listener: REST control plane, WebSocket
//! admission, Prometheus metrics, and a graceful shutdown path that drains
//! every room before releasing the task pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley::config::Config;
use parley::metrics::{self, ServerMetrics};
use parley::server::api::{self, AppState};
use parley::server::hub::Hub;
use parley::transport::task_pool::TaskPool;

/// How long shutdown waits for room actors to drain
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env());
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let hub = Arc::new(Hub::new());
    let pool = Arc::new(TaskPool::new(config.task_pool_size));

    let state = AppState {
        hub: hub.clone(),
        pool: pool.clone(),
        metrics: Arc::new(ServerMetrics::new()),
        config: config.clone(),
        prometheus: Some(prometheus),
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, pool_capacity = config.task_pool_size, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(hub, pool))
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

/// Wait for a shutdown signal, then drain: stop every room, wait for the
/// actors up to the deadline, and release the pool so no further IO tasks
/// start.
async fn shutdown(hub: Arc<Hub>, pool: Arc<TaskPool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining rooms");
    hub.stop_all(SHUTDOWN_DEADLINE).await;
    pool.release();
}
