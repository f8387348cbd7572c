//! Chat endpoints
//!
//! `/v1/chat/completions` speaks the standard completion protocol;
//! `/v1/chat/prompt` is the plain-text surface with per-user
//! conversation continuity.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::{AppError, AppResult},
    openai::{ApiRequest, PromptRequest},
    AppState,
};

/// `OPTIONS /v1/chat/completions` CORS preflight
pub async fn completions_preflight() -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        ],
    )
        .into_response()
}

/// `POST /v1/chat/completions`
pub async fn completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ApiRequest>,
) -> AppResult<Response> {
    let response = state
        .pool
        .api_request(&request, state.config.work_timeout_secs)
        .await?
        .ok_or(AppError::NoResponse)?;
    Ok(Json(response).into_response())
}

/// `POST /v1/chat/prompt`
///
/// Answers plain text, or JSON when the client asks for it.
pub async fn prompt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PromptRequest>,
) -> AppResult<Response> {
    let text = state
        .pool
        .prompt(
            &request.content,
            request.model.clone(),
            request.openid.as_deref(),
            request.new_chat,
            state.config.work_timeout_secs,
        )
        .await?
        .ok_or(AppError::NoResponse)?;

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false);

    if wants_json {
        Ok(Json(text).into_response())
    } else {
        Ok(text.into_response())
    }
}
