// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error type shared by all device operations.

use thiserror::Error;

/// Tagged error for device control and WDA operations.
///
/// Variants that wrap an external tool carry its name in the message so
/// callers (and humans reading logs) can tell which subprocess failed.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A device, element, or file the caller named does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request shape is invalid.
    #[error("{0}")]
    Validation(String),

    /// Connection or read failure against a WDA endpoint.
    #[error("[wda] {0}")]
    Transport(String),

    /// Soft timeout on a WDA request. Recoverable — callers that set
    /// `raise_on_timeout` handle this themselves (restart + skeleton).
    #[error("[wda] request timed out: {0}")]
    Timeout(String),

    /// A required external binary is absent from the host.
    #[error("{tool} not found. {hint}")]
    ToolchainMissing { tool: String, hint: String },

    /// `git clone` failed or timed out.
    #[error("[git] {0}")]
    CloneFailed(String),

    /// `xcodebuild` failed or timed out.
    #[error("[xcodebuild] {0}")]
    BuildFailed(String),

    /// Device install failed.
    #[error("[{tool}] {detail}")]
    InstallFailed { tool: String, detail: String },

    /// A subprocess exceeded its wall-clock budget. Distinct from a
    /// nonzero exit.
    #[error("[{tool}] timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// A required subsystem (tunnel daemon, driver) is not reachable even
    /// after recovery.
    #[error("{0}")]
    Unavailable(String),

    /// Anything else. Never swallowed.
    #[error("{0}")]
    Unknown(String),
}

impl DeviceError {
    /// Stable machine-readable tag for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION",
            Self::Transport(_) => "WDA_TRANSPORT",
            Self::Timeout(_) => "WDA_TIMEOUT",
            Self::ToolchainMissing { .. } => "TOOLCHAIN_MISSING",
            Self::CloneFailed(_) => "CLONE_FAILED",
            Self::BuildFailed(_) => "BUILD_FAILED",
            Self::InstallFailed { .. } => "INSTALL_FAILED",
            Self::ToolTimeout { .. } => "TOOL_TIMEOUT",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// True for timeout-flavored errors (soft WDA timeout or subprocess
    /// wall-clock overrun).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ToolTimeout { .. })
    }
}
