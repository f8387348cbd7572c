//! Admin surface
//!
//! Accounts enter the fleet here. The password is sealed before it
//! touches the database, and the lifecycle worker is asked to check the
//! account immediately instead of waiting for the next hourly sweep.

use std::sync::Arc;

use anyhow::anyhow;
use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    error::{AppError, AppResult},
    pool::LifecycleCommand,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct AddBotRequest {
    pub email: String,
    pub password: String,
}

/// `POST /admin/add_bot`
pub async fn add_bot(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddBotRequest>,
) -> AppResult<Json<Value>> {
    if request.email.is_empty() || request.password.is_empty() {
        return Err(AppError::BadRequest(
            "email and password are required".to_string(),
        ));
    }

    let sealed = state
        .sealer
        .seal(&request.password)
        .map_err(|err| AppError::Internal(anyhow!(err)))?;
    state.store.insert_account(&request.email, &sealed).await?;

    state
        .lifecycle
        .send(LifecycleCommand::CheckAccount(request.email.clone()))
        .await
        .map_err(|_| AppError::Internal(anyhow!("lifecycle worker is gone")))?;

    info!(email = %request.email, "account added");
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub email: String,
    pub is_active: bool,
}

/// `POST /admin/set_active`
///
/// Deactivating an account evicts its session immediately; reactivating
/// asks the lifecycle worker to health-check it.
pub async fn set_active(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetActiveRequest>,
) -> AppResult<Json<Value>> {
    state
        .store
        .set_account_active(&request.email, request.is_active)
        .await?;

    if request.is_active {
        state
            .lifecycle
            .send(LifecycleCommand::CheckAccount(request.email.clone()))
            .await
            .map_err(|_| AppError::Internal(anyhow!("lifecycle worker is gone")))?;
    } else {
        state.pool.remove(&request.email).await;
    }

    info!(email = %request.email, is_active = request.is_active, "account toggled");
    Ok(Json(json!({ "status": "ok" })))
}
