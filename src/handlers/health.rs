use axum::{extract::State, http::StatusCode, response::Json};
use once_cell::sync::Lazy;
use std::time::Instant;
use tracing::info;

use crate::handlers::AppState;
use crate::models::HealthResponse;

/// Process start, forced from `main` so uptime counts from boot.
pub static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    info!("Health check requested");

    let rate_limiting = state.rate_limiter.stats();

    let (status, message) = if state.rate_limiter.has_capacity() {
        ("healthy", "PDF image extraction service is running")
    } else {
        ("degraded", "All request slots are busy, new uploads are rejected")
    };

    let response = HealthResponse {
        status: status.to_string(),
        message: message.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        uptime_seconds: START_TIME.elapsed().as_secs(),
        decoders: state.processor.decoder_support(),
        rate_limiting,
    };

    info!(
        status = status,
        in_flight_capacity = rate_limiting.available_permits,
        "Health check completed"
    );

    Json(response)
}

/// Readiness check endpoint (for Kubernetes/Railway)
pub async fn ready_handler(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.rate_limiter.has_capacity() {
        info!("Readiness check passed");
        Ok(StatusCode::OK)
    } else {
        info!("Readiness check failed - no free request slots");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
