// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface of the control server.

pub mod devices;
pub mod ui;
pub mod wda;

use std::sync::Arc;

use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// `GET /health` — unauthenticated liveness probe.
async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

/// Build the axum `Router` with all server routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        // Devices & pool
        .route("/api/v1/devices", get(devices::list_devices))
        .route("/api/v1/devices/resolve", post(devices::resolve))
        .route("/api/v1/devices/ensure", post(devices::ensure))
        .route("/api/v1/devices/claim", post(devices::claim))
        .route("/api/v1/devices/release", post(devices::release))
        // UI inspection
        .route("/api/v1/device/ui", get(ui::get_ui_elements))
        .route("/api/v1/device/ui/element", get(ui::get_element))
        .route("/api/v1/device/ui/wait-for-element", post(ui::wait_for_element))
        .route("/api/v1/device/screen-summary", get(ui::get_screen_summary))
        // UI interaction
        .route("/api/v1/device/ui/tap", post(ui::tap))
        .route("/api/v1/device/ui/tap-element", post(ui::tap_element))
        .route("/api/v1/device/ui/swipe", post(ui::swipe))
        .route("/api/v1/device/ui/type", post(ui::type_text))
        .route("/api/v1/device/ui/clear", post(ui::clear_text))
        .route("/api/v1/device/ui/press", post(ui::press_button))
        // WDA lifecycle
        .route("/api/v1/device/wda/setup", post(wda::setup))
        .route("/api/v1/device/wda/start", post(wda::start))
        .route("/api/v1/device/wda/stop", post(wda::stop))
        // Middleware
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
