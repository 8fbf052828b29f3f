//! Health and diagnostics endpoints.
//!
//! Kubernetes-compatible probes plus an operator-facing stats endpoint:
//! - `GET /health` - liveness (is the process running?)
//! - `GET /ready` - readiness (worker pool up, registry serving?)
//! - `GET /stats` - room and worker-load snapshot as JSON
//!
//! The `/metrics` endpoint is served separately via
//! `metrics-exporter-prometheus`.

use crate::actors::RoomRegistryHandle;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Liveness/readiness flags for the probes.
#[derive(Debug)]
pub struct HealthState {
    /// True after startup initialization.
    live: AtomicBool,
    /// True once the worker pool is up and the registry accepts rooms.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ObservabilityState {
    health: Arc<HealthState>,
    registry: RoomRegistryHandle,
}

/// Build the router serving `/health`, `/ready`, and `/stats`.
pub fn observability_router(health: Arc<HealthState>, registry: RoomRegistryHandle) -> Router {
    let state = ObservabilityState { health, registry };
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn liveness_handler(State(state): State<ObservabilityState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<ObservabilityState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Room and worker-load snapshot, straight from the registry.
async fn stats_handler(State(state): State<ObservabilityState>) -> Response {
    match state.registry.status().await {
        Ok(status) => Json(status).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
