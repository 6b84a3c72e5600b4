//! Metrics instrumentation
//!
//! The hub core only knows the [`MetricsNotifier`] trait; this module wires
//! it to the `metrics` facade and exposes the recorded values through a
//! Prometheus handle rendered by the `/metrics` route.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::error::{Error, Result};
use crate::server::room::{MetricsNotifier, RoomId};

/// Install the process-wide Prometheus recorder.
///
/// Can only succeed once per process; the returned handle renders the
/// exposition format for the `/metrics` route.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::config(format!("failed to install metrics recorder: {}", e)))
}

/// Facade-backed implementation of the hub's metrics notifier
#[derive(Debug, Clone, Default)]
pub struct ServerMetrics;

impl ServerMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsNotifier for ServerMetrics {
    fn dropped_message(&self, room_id: RoomId, username: &str) {
        counter!("ws_messages_total", "direction" => "dropped").increment(1);
        debug!(room_id, username, "dropped message for slow consumer");
    }

    fn client_connected(&self) {
        gauge!("ws_active_connections").increment(1.0);
    }

    fn client_disconnected(&self) {
        gauge!("ws_active_connections").decrement(1.0);
    }
}

/// Axum middleware recording per-request counters and latency histograms
pub async fn track_http(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let response = next.run(request).await;

    let latency = start.elapsed().as_secs_f64();
    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(latency);

    response
}
