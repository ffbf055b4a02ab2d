//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (bus answers a ping)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// healthy or degraded
    pub status: String,
    /// connected or disconnected
    pub bus: String,
    pub websocket_clients: usize,
    /// Distinct rooms with at least one subscribed client
    pub rooms: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: String,
}

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<Json<ReadyResponse>> {
    state
        .bus
        .ping()
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("bus: {}", e)))?;

    Ok(Json(ReadyResponse {
        status: "ready".to_string(),
    }))
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let bus_ok = state.bus.ping().await.is_ok();
    let stats = state.hub.stats().await;

    Json(HealthResponse {
        status: if bus_ok { "healthy" } else { "degraded" }.to_string(),
        bus: if bus_ok { "connected" } else { "disconnected" }.to_string(),
        websocket_clients: stats.total_clients,
        rooms: stats.rooms.len(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
