// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Physical-device UI automation backend for the quern control server.
//!
//! Owns WebDriverAgent driver processes on real iPhones, speaks WDA's HTTP
//! API, and degrades to targeted element queries when the accessibility
//! snapshot is too slow to return.

pub mod client;
pub mod discovery;
pub mod elements;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod paths;
pub mod proc;
pub mod state;
pub mod summary;
pub mod tunnel;

pub use client::WdaClient;
pub use error::DeviceError;

/// Shorten a UDID for log output.
pub fn short_udid(udid: &str) -> &str {
    udid.get(..8).unwrap_or(udid)
}
