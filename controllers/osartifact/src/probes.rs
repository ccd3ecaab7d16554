//! Health, readiness and metrics endpoints.
//!
//! - `GET /healthz`: process is up
//! - `GET /readyz`: 503 until the artifact watch has synced
//! - `GET /metrics`: Prometheus text format

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// State shared between the probe handlers and the watcher
#[derive(Debug, Clone)]
pub struct ProbeState {
    ready: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
}

impl ProbeState {
    /// Not-ready state exporting `metrics`
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    /// Report ready from now on
    pub fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            info!("Controller ready");
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Build the probe router
pub fn probe_routes(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe endpoints on `addr` until the listener fails
pub async fn serve(addr: SocketAddr, state: ProbeState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind probe port");
        e
    })?;
    info!(addr = %addr, "Probe server started");
    axum::serve(listener, probe_routes(state)).await?;
    Ok(())
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.export_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
