// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device enumeration and pool handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::pool::ResolveCriteria;
use crate::state::AppState;

/// `GET /api/v1/devices` — enumerated devices plus the active UDID.
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let devices = state.controller.list_devices().await?;
    Ok(Json(serde_json::json!({
        "devices": devices,
        "total": devices.len(),
        "active_udid": state.controller.active_udid(),
    }))
    .into_response())
}

/// `POST /api/v1/devices/resolve` — criteria → UDID.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Json(criteria): Json<ResolveCriteria>,
) -> Result<Response, ApiError> {
    let udid = state.controller.resolve_device(&criteria).await?;
    Ok(Json(serde_json::json!({"udid": udid})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct EnsureRequest {
    pub count: usize,
    #[serde(default)]
    pub name_contains: Option<String>,
}

/// `POST /api/v1/devices/ensure` — boot simulators until `count` matching
/// devices are up.
pub async fn ensure(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnsureRequest>,
) -> Result<Response, ApiError> {
    let udids = state.controller.ensure_devices(body.count, body.name_contains.as_deref()).await?;
    Ok(Json(serde_json::json!({"udids": udids, "count": udids.len()})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub udid: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `POST /api/v1/devices/claim` — lease a device. A missing session id
/// gets a generated one, returned in the response.
pub async fn claim(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClaimRequest>,
) -> Result<Response, ApiError> {
    let session_id =
        body.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let claim = state.controller.claim(&body.udid, &session_id)?;
    Ok(Json(serde_json::json!({"status": "claimed", "claim": claim})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub udid: String,
    pub session_id: String,
}

/// `POST /api/v1/devices/release`
pub async fn release(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReleaseRequest>,
) -> Result<Response, ApiError> {
    let released = state.controller.release(&body.udid, &body.session_id)?;
    Ok(Json(serde_json::json!({"status": "ok", "released": released})).into_response())
}
