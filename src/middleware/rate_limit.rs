use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::handlers::AppState;
use crate::models::RateLimitStats;

/// Caps the number of requests processed at once. Excess requests are
/// rejected immediately rather than queued.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    total_requests: AtomicU64,
    rejected_requests: AtomicU64,
}

impl RateLimiter {
    pub fn new(max_concurrent_requests: usize) -> Self {
        info!(
            max_concurrent_requests,
            "Initializing request semaphore"
        );
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests)),
            total_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
        }
    }

    /// False while every request slot is taken.
    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            available_permits: self.semaphore.available_permits(),
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    // Skip rate limiting for health endpoints
    if path == "/health" || path == "/ready" {
        return Ok(next.run(request).await);
    }

    let limiter = &state.rate_limiter;
    let total_requests = limiter.total_requests.fetch_add(1, Ordering::Relaxed) + 1;

    let _permit = Arc::clone(&limiter.semaphore)
        .try_acquire_owned()
        .map_err(|_| {
            let rejected = limiter.rejected_requests.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                path = %path,
                total_requests = total_requests,
                rejected_requests = rejected,
                available_permits = limiter.semaphore.available_permits(),
                "Rate limit exceeded - too many concurrent requests"
            );
            AppError::RateLimitExceeded
        })?;

    debug!(
        path = %path,
        total_requests = total_requests,
        available_permits = limiter.semaphore.available_permits(),
        "Request permit acquired"
    );

    let response = next.run(request).await;

    debug!(
        path = %path,
        available_permits = limiter.semaphore.available_permits() + 1, // +1 because permit will be released
        "Request completed, permit released"
    );

    Ok(response)
}
