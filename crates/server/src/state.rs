// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use crate::controller::Controller;

/// Shared server state.
pub struct AppState {
    pub api_key: String,
    pub controller: Controller,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(api_key: String, controller: Controller, shutdown: CancellationToken) -> Self {
        Self { api_key, controller, shutdown }
    }
}
