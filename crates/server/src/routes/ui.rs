// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UI inspection and interaction handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use quern_device::elements::Element;

use crate::controller::WaitParams;
use crate::error::{bad_request, ApiError};
use crate::state::AppState;

const MAX_WAIT_TIMEOUT_SECS: f64 = 60.0;

#[derive(Debug, Deserialize)]
pub struct UiQuery {
    #[serde(default)]
    pub udid: Option<String>,
    #[serde(default)]
    pub children_of: Option<String>,
    #[serde(default)]
    pub snapshot_depth: Option<u32>,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Serialize)]
struct UiResponse {
    elements: Vec<Element>,
    element_count: usize,
    udid: String,
}

/// `GET /api/v1/device/ui`
pub async fn get_ui_elements(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UiQuery>,
) -> Result<Response, ApiError> {
    if let Some(depth) = q.snapshot_depth {
        if !(1..=50).contains(&depth) {
            return Ok(bad_request("snapshot_depth must be between 1 and 50"));
        }
    }

    let controller = &state.controller;
    let (elements, udid) = match q.children_of {
        Some(ref children_of) => {
            controller
                .get_ui_elements_children_of(children_of, q.udid.as_deref(), q.snapshot_depth)
                .await?
        }
        None => {
            controller
                .get_ui_elements(q.udid.as_deref(), q.snapshot_depth, q.strategy.as_deref())
                .await?
        }
    };

    let element_count = elements.len();
    Ok(Json(UiResponse { elements, element_count, udid }).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ElementQuery {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default, rename = "type")]
    pub element_type: Option<String>,
    #[serde(default)]
    pub udid: Option<String>,
}

/// `GET /api/v1/device/ui/element` — single element state without the full
/// tree. 404 when nothing matches; 200 with `match_count` when ambiguous.
pub async fn get_element(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ElementQuery>,
) -> Result<Response, ApiError> {
    let (found, udid) = state
        .controller
        .get_element(
            q.label.as_deref(),
            q.identifier.as_deref(),
            q.element_type.as_deref(),
            q.udid.as_deref(),
        )
        .await?;

    let mut body = serde_json::json!({"element": found.element, "udid": udid});
    if let Some(count) = found.match_count {
        body["match_count"] = count.into();
    }
    Ok(Json(body).into_response())
}

/// `POST /api/v1/device/ui/wait-for-element` — server-side poll. Always
/// 200 with `matched`; only validation problems are non-200.
pub async fn wait_for_element(
    State(state): State<Arc<AppState>>,
    Json(params): Json<WaitParams>,
) -> Result<Response, ApiError> {
    if params.timeout > MAX_WAIT_TIMEOUT_SECS {
        return Ok(bad_request("Timeout cannot exceed 60 seconds"));
    }
    if matches!(params.condition.as_str(), "value_equals" | "value_contains")
        && params.value.is_none()
    {
        return Ok(bad_request(format!(
            "Condition '{}' requires a value parameter",
            params.condition
        )));
    }

    let (result, udid) = state.controller.wait_for_element(&params).await?;
    let mut body = serde_json::to_value(&result)
        .map_err(|e| quern_device::DeviceError::Unknown(e.to_string()))?;
    body["udid"] = udid.into();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
    #[serde(default)]
    pub udid: Option<String>,
    #[serde(default)]
    pub snapshot_depth: Option<u32>,
    #[serde(default)]
    pub strategy: Option<String>,
}

fn default_max_elements() -> usize {
    20
}

/// `GET /api/v1/device/screen-summary` — §summary output;
/// `max_elements=0` disables truncation.
pub async fn get_screen_summary(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SummaryQuery>,
) -> Result<Response, ApiError> {
    if q.max_elements > 500 {
        return Ok(bad_request("max_elements must be at most 500"));
    }

    let (summary, udid) = state
        .controller
        .get_screen_summary(q.max_elements, q.udid.as_deref(), q.snapshot_depth, q.strategy.as_deref())
        .await?;
    let mut body = serde_json::to_value(&summary)
        .map_err(|e| quern_device::DeviceError::Unknown(e.to_string()))?;
    body["udid"] = udid.into();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TapRequest {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub udid: Option<String>,
}

/// `POST /api/v1/device/ui/tap`
pub async fn tap(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TapRequest>,
) -> Result<Response, ApiError> {
    let udid = state.controller.tap(body.x, body.y, body.udid.as_deref()).await?;
    Ok(Json(serde_json::json!({"status": "ok", "udid": udid, "x": body.x, "y": body.y}))
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct TapElementRequest {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default, rename = "type")]
    pub element_type: Option<String>,
    #[serde(default)]
    pub udid: Option<String>,
}

/// `POST /api/v1/device/ui/tap-element` — 200 + `ambiguous` with the match
/// list on multi-match, 404 on none.
pub async fn tap_element(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TapElementRequest>,
) -> Result<Response, ApiError> {
    let outcome = state
        .controller
        .tap_element(
            body.label.as_deref(),
            body.identifier.as_deref(),
            body.element_type.as_deref(),
            body.udid.as_deref(),
        )
        .await?;
    Ok(Json(outcome).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SwipeRequest {
    pub start_x: f64,
    pub start_y: f64,
    pub end_x: f64,
    pub end_y: f64,
    #[serde(default = "default_swipe_duration")]
    pub duration: f64,
    #[serde(default)]
    pub udid: Option<String>,
}

fn default_swipe_duration() -> f64 {
    0.5
}

/// `POST /api/v1/device/ui/swipe`
pub async fn swipe(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SwipeRequest>,
) -> Result<Response, ApiError> {
    let udid = state
        .controller
        .swipe(body.start_x, body.start_y, body.end_x, body.end_y, body.duration, body.udid.as_deref())
        .await?;
    Ok(Json(serde_json::json!({"status": "ok", "udid": udid})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TypeTextRequest {
    pub text: String,
    #[serde(default)]
    pub udid: Option<String>,
}

/// `POST /api/v1/device/ui/type`
pub async fn type_text(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TypeTextRequest>,
) -> Result<Response, ApiError> {
    let udid = state.controller.type_text(&body.text, body.udid.as_deref()).await?;
    Ok(Json(serde_json::json!({"status": "ok", "udid": udid})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ClearTextRequest {
    pub x: f64,
    pub y: f64,
    #[serde(default, rename = "type")]
    pub element_type: Option<String>,
    #[serde(default)]
    pub udid: Option<String>,
}

/// `POST /api/v1/device/ui/clear`
pub async fn clear_text(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClearTextRequest>,
) -> Result<Response, ApiError> {
    let udid = state
        .controller
        .clear_text(body.x, body.y, body.element_type.as_deref(), body.udid.as_deref())
        .await?;
    Ok(Json(serde_json::json!({"status": "ok", "udid": udid})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct PressButtonRequest {
    pub button: String,
    #[serde(default)]
    pub udid: Option<String>,
}

/// `POST /api/v1/device/ui/press`
pub async fn press_button(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PressButtonRequest>,
) -> Result<Response, ApiError> {
    let udid = state.controller.press_button(&body.button, body.udid.as_deref()).await?;
    Ok(Json(serde_json::json!({"status": "ok", "udid": udid})).into_response())
}
