//! HTTP routes for Switchboard
//!
//! This module defines all HTTP endpoints exposed by the gateway.

pub mod admin;
pub mod chat;
pub mod health;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, options, post},
    Router,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::{
    middleware::{auth::auth_middleware, host::host_middleware},
    AppState,
};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Bearer-protected surface
    let protected_routes = Router::new()
        .route("/v1/chat/completions", post(chat::completions))
        .route("/v1/chat/prompt", post(chat::prompt))
        .route("/admin/add_bot", post(admin::add_bot))
        .route("/admin/set_active", post(admin::set_active))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Liveness and the CORS preflight stay open
    let public_routes = Router::new()
        .route("/ping", get(health::ping))
        .route(
            "/v1/chat/completions",
            options(chat::completions_preflight),
        );

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            host_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
