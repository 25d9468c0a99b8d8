//! Health check endpoint
//!
//! Reports the service identity plus the state a caller needs to judge
//! whether new requests will queue: worker pool occupancy and the database
//! the service extracts from.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WorkerStatus {
    pub total: usize,
    /// Slots not held by a model preparation or extraction
    pub idle: usize,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStatus {
    pub dt: f64,
    pub npts: usize,
    /// Seconds from the first to the last sample
    pub length: f64,
    pub dominant_period: f64,
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub workers: WorkerStatus,
    pub database: DatabaseStatus,
    pub stations: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let info = &state.backend.info;
    Json(HealthResponse {
        status: "ok".to_string(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: WorkerStatus {
            total: state.pool.size(),
            idle: state.pool.available(),
        },
        database: DatabaseStatus {
            dt: info.dt,
            npts: info.npts,
            length: info.length,
            dominant_period: info.dominant_period,
        },
        stations: state.backend.stations.len(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
