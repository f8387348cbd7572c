//! Error types for Switchboard
//!
//! Three closed sets: `BotError` for the upstream session layer,
//! `ScheduleError` for scheduler-surfaced outcomes, and `AppError` for the
//! HTTP edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by an upstream session.
///
/// The session never retries and never swallows these; they propagate to
/// the pool scheduler, which is the sole retry site.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid_token")]
    AccessTokenInvalid,

    #[error("token_expired")]
    AccessTokenExpired,

    #[error("unsupported_model:{0}")]
    UnsupportedModel(String),

    #[error("invalid_response")]
    InvalidResponse,

    #[error("internal_server_error")]
    InternalServerError,

    /// Upstream answered with a non-2xx status.
    #[error("openai_error code={code}, message={message:?}")]
    OpenAi { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl BotError {
    /// Status code for upstream HTTP errors, if this is one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            BotError::OpenAi { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Outcomes the scheduler reports for a failed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The pinned account has no live session.
    #[error("bot_offline")]
    BotOffline,

    /// Upstream reported the conversation missing (404).
    #[error("conversation_not_found")]
    ConversationNotFound,

    /// Upstream rate-limited the account (429).
    #[error("too_many_requests")]
    TooManyRequests,

    /// Any other upstream error.
    #[error("server_error")]
    ServerError,

    /// No session became available within the wait budget.
    #[error("timeout")]
    Timeout,

    /// Transient failures exhausted the retry budget.
    #[error("max_retry")]
    MaxRetry,
}

/// Application-level errors for the HTTP edge
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid authentication scheme.")]
    Unauthorized,

    #[error("Invalid access token.")]
    Forbidden,

    #[error("No response found")]
    NoResponse,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NoResponse => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let detail = match &self {
            // Storage and internal failures are not echoed to clients.
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
