//! Ambient HTTP surface: `/healthz`, `/readyz`, `/metrics`.
//!
//! `/healthz` reports process liveness only. `/readyz` additionally checks
//! the local sqlite pool and at least one connected relay, so an
//! orchestrator can gate traffic on actual readiness rather than just the
//! process being alive.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use sqlx::sqlite::SqlitePool;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct ServerState {
    pub db: SqlitePool,
    pub relay_connected: Arc<std::sync::atomic::AtomicBool>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: ServerState) -> eyre::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(bind_addr, "rider http server listening");
    crate::metrics::UP.set(1.0);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<ServerState>) -> StatusCode {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let relay_ok = state.relay_connected.load(std::sync::atomic::Ordering::Relaxed);
    if db_ok && relay_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}
