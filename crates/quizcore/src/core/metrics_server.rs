//! HTTP server for exposing Prometheus metrics
//!
//! Runs on its own port (`METRICS_PORT`, default 9090, `0` disables it):
//! - `/metrics` - Prometheus text exposition of the quiz [`Metrics`]
//! - `/health` - liveness with uptime
//! - `/ready` - 200 once the worker pool runs and accepts tasks

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::metrics::Metrics;
use crate::quiz::pool::WorkerPool;

#[derive(Clone)]
struct ServerState {
    start_time: Instant,
    metrics: Arc<Metrics>,
    pool: Arc<WorkerPool>,
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(Arc::new(state))
}

/// Serves metrics until `shutdown` is cancelled.
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(ServerState {
        start_time: Instant::now(),
        metrics,
        pool,
    });

    log::info!("Starting metrics server on http://{}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Metrics server stopped");
    Ok(())
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.metrics.encode() {
        Ok((content_type, body)) => (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();
    let status = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime.as_secs(),
        "uptime_human": format_duration(uptime),
        "service": "quizbot",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, axum::Json(status))
}

async fn ready_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let stats = state.pool.get_stats();
    let ready = state.pool.is_running() && stats.accepting_new;

    let status = serde_json::json!({
        "status": if ready { "ready" } else { "unavailable" },
        "accepting_new": stats.accepting_new,
        "queued_tasks": stats.queued_tasks,
    });
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, axum::Json(status))
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
