//! Health check endpoints

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub pong: bool,
}

/// Liveness check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "up" })
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { pong: true })
}
