//! Liveness endpoint.

use axum::{Json, Router, extract::State, routing::get};
use fieldvault_shared::Platform;
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Platforms with a configured adapter.
    pub platforms: Vec<Platform>,
    /// Number of storage-backed fields.
    pub bound_fields: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let platforms = Platform::ALL
        .into_iter()
        .filter(|p| state.broker.platform(*p).is_some())
        .collect();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        platforms,
        bound_fields: state.broker.registry().len(),
    })
}

/// Creates health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
