// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! quern-server: device control and UI automation over HTTP.

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod pool;
pub mod routes;
pub mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::controller::Controller;
use crate::routes::build_router;
use crate::state::AppState;

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "***".to_owned();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Run the server until shutdown (SIGINT or token cancellation).
pub async fn run(mut config: ServerConfig) -> anyhow::Result<()> {
    let api_key = config.resolve_api_key();
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState::new(api_key.clone(), Controller::new(), shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        api_key = %mask_key(&api_key),
        "quern-server listening"
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // Drain: sessions deleted, forwards terminated, leases dropped.
    state.controller.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}
