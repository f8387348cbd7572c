//! Authentication middleware
//!
//! Edge clients authenticate with a single static bearer token from
//! configuration. A missing or non-bearer header is 401; a wrong token
//! is 403.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{error::AppError, AppState};

/// Extract the Authorization header and return the bearer token
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Require the configured edge bearer token.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = extract_bearer_token(auth_header).ok_or(AppError::Unauthorized)?;
    if token != state.config.auth_token {
        debug!(path = %request.uri().path(), "edge token rejected");
        return Err(AppError::Forbidden);
    }

    Ok(next.run(request).await)
}
