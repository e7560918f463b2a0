// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

/// Device control and UI-automation server for iOS hardware and simulators.
#[derive(Debug, Clone, Parser)]
#[command(name = "quern-server", version, about)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[arg(long, env = "QUERN_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "QUERN_PORT", default_value_t = 9100)]
    pub port: u16,

    /// API key required on every endpoint except /health.
    /// Generated (and logged masked) when unset.
    #[arg(long, env = "QUERN_API_KEY")]
    pub api_key: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "QUERN_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "QUERN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    /// The effective API key, generating one when the config has none.
    pub fn resolve_api_key(&mut self) -> String {
        if let Some(ref key) = self.api_key {
            return key.clone();
        }
        let key = uuid::Uuid::new_v4().simple().to_string();
        self.api_key = Some(key.clone());
        key
    }
}
