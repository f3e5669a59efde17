pub mod extract;
pub mod health;

pub use extract::*;
pub use health::*;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::middleware::{logging_middleware, rate_limit_middleware, RateLimiter};
use crate::services::PdfProcessor;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared by every handler; built once at start-up.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub processor: Arc<PdfProcessor>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let processor = PdfProcessor::from_config(&config);
        let rate_limiter = RateLimiter::new(config.max_concurrent_requests);
        Self {
            config: Arc::new(config),
            processor: Arc::new(processor),
            rate_limiter: Arc::new(rate_limiter),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let body_limit = config.max_file_size_bytes() + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        // Health endpoints
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // API endpoints
        .route(&config.route("/extract-images"), post(extract_images_handler))
        .route(&config.route("/extract-images/binary"), post(extract_binary_handler))
        .route(&config.route("/analyze-image"), post(analyze_image_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(axum::middleware::from_fn(logging_middleware))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit_middleware,
                )),
        )
        .with_state(state)
}
