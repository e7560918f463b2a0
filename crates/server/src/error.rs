// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DeviceError → HTTP mapping. Every error body is JSON `{detail}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use quern_device::DeviceError;

/// Uniform error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Wrapper that lets handlers bubble `DeviceError` with `?`.
pub struct ApiError(pub DeviceError);

impl From<DeviceError> for ApiError {
    fn from(e: DeviceError) -> Self {
        Self(e)
    }
}

pub fn status_for(e: &DeviceError) -> StatusCode {
    match e.kind() {
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "VALIDATION" => StatusCode::BAD_REQUEST,
        // Backend unavailable: WDA unreachable or toolchain missing.
        "WDA_TRANSPORT" | "UNAVAILABLE" | "TOOLCHAIN_MISSING" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), err = %self.0, "request failed");
        }
        (status, Json(ErrorBody { detail: self.0.to_string() })).into_response()
    }
}

/// Shorthand for a 400 with a plain message.
pub fn bad_request(detail: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { detail: detail.into() })).into_response()
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
