// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API key authentication middleware.
//!
//! Accepts `Authorization: Bearer <key>` or `X-API-Key: <key>` on every
//! endpoint except the health check. Failures are a uniform 401 that never
//! reveals whether a route exists.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::ErrorBody;
use crate::state::AppState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate the API key from request headers.
pub fn validate_api_key(headers: &HeaderMap, expected: &str) -> bool {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if constant_time_eq(token, expected) {
            return true;
        }
    }

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if constant_time_eq(key, expected) {
            return true;
        }
    }

    false
}

/// Axum middleware enforcing API key auth. `/health` stays public.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path == "/api/v1/health" {
        return next.run(req).await;
    }

    if !validate_api_key(req.headers(), &state.api_key) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody { detail: "Invalid or missing API key".to_owned() }),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
