// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WDA lifecycle handlers. Physical devices only; `needs_identity_selection`
//! is a structured 200, not an error.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub udid: String,
    #[serde(default)]
    pub team_id: Option<String>,
}

/// `POST /api/v1/device/wda/setup`
pub async fn setup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetupRequest>,
) -> Result<Response, ApiError> {
    let outcome = state.controller.setup_wda(&body.udid, body.team_id.as_deref()).await?;
    Ok(Json(outcome).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DriverRequest {
    pub udid: String,
}

/// `POST /api/v1/device/wda/start`
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DriverRequest>,
) -> Result<Response, ApiError> {
    let status = state.controller.start_wda(&body.udid).await?;
    Ok(Json(status).into_response())
}

/// `POST /api/v1/device/wda/stop`
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DriverRequest>,
) -> Result<Response, ApiError> {
    let status = state.controller.stop_wda(&body.udid).await?;
    Ok(Json(status).into_response())
}
