//! Host allow-list middleware
//!
//! When `allowed_hosts` is configured, requests whose `Host` header is
//! not on the list are rejected. An empty list disables the check.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{error::AppError, AppState};

pub async fn host_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let allowed = &state.config.allowed_hosts;
    if allowed.is_empty() {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        // Compare without the port clients may append.
        .map(|h| h.split(':').next().unwrap_or(h).to_string())
        .unwrap_or_default();

    if !allowed.iter().any(|a| a == &host) {
        warn!(host = %host, "request from disallowed host");
        return Err(AppError::Forbidden);
    }

    Ok(next.run(request).await)
}
