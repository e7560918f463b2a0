// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device enumeration: simulators via simctl, physical devices via
//! devicectl.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::DeviceError;
use crate::proc::run_tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Simulator,
    Physical,
}

/// One enumerated device. Physical devices are addressed by their
/// CoreDevice UUID here; the tunnel daemon's hardware UDID is resolved
/// separately when a connection is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub udid: String,
    pub name: String,
    pub kind: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    pub booted: bool,
    pub available: bool,
}

impl DeviceInfo {
    pub fn is_physical(&self) -> bool {
        self.kind == DeviceKind::Physical
    }
}

#[derive(Debug, Deserialize)]
struct SimctlList {
    #[serde(default)]
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default, rename = "isAvailable")]
    is_available: bool,
}

/// "com.apple.CoreSimulator.SimRuntime.iOS-17-2" → "iOS 17.2".
fn runtime_to_os_version(runtime: &str) -> Option<String> {
    let tail = runtime.rsplit('.').next()?;
    let mut parts = tail.splitn(2, '-');
    let platform = parts.next()?;
    let version = parts.next()?.replace('-', ".");
    Some(format!("{platform} {version}"))
}

pub(crate) fn parse_simctl_list(json: &str) -> Result<Vec<DeviceInfo>, DeviceError> {
    let list: SimctlList = serde_json::from_str(json)
        .map_err(|e| DeviceError::Unknown(format!("simctl output invalid: {e}")))?;

    let mut devices = Vec::new();
    for (runtime, sims) in &list.devices {
        let os_version = runtime_to_os_version(runtime);
        for sim in sims {
            devices.push(DeviceInfo {
                udid: sim.udid.clone(),
                name: sim.name.clone(),
                kind: DeviceKind::Simulator,
                os_version: os_version.clone(),
                booted: sim.state == "Booted",
                available: sim.is_available,
            });
        }
    }
    Ok(devices)
}

async fn list_simulators() -> Result<Vec<DeviceInfo>, DeviceError> {
    let mut cmd = Command::new("xcrun");
    cmd.args(["simctl", "list", "devices", "--json"]);
    let out = run_tool("simctl", cmd, Duration::from_secs(30)).await?;
    if !out.success() {
        return Err(DeviceError::Unknown(format!(
            "simctl list devices failed: {}",
            out.stderr.trim()
        )));
    }
    parse_simctl_list(&out.stdout)
}

#[derive(Debug, Deserialize)]
struct DevicectlOutput {
    #[serde(default)]
    result: DevicectlResult,
}

#[derive(Debug, Default, Deserialize)]
struct DevicectlResult {
    #[serde(default)]
    devices: Vec<DevicectlDevice>,
}

#[derive(Debug, Deserialize)]
struct DevicectlDevice {
    #[serde(default)]
    identifier: String,
    #[serde(default, rename = "deviceProperties")]
    device_properties: DevicectlProps,
    #[serde(default, rename = "connectionProperties")]
    connection_properties: DevicectlConnection,
}

#[derive(Debug, Default, Deserialize)]
struct DevicectlProps {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "osVersionNumber")]
    os_version_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DevicectlConnection {
    #[serde(default, rename = "tunnelState")]
    tunnel_state: Option<String>,
}

pub(crate) fn parse_devicectl_list(json: &str) -> Result<Vec<DeviceInfo>, DeviceError> {
    let parsed: DevicectlOutput = serde_json::from_str(json)
        .map_err(|e| DeviceError::Unknown(format!("devicectl output invalid: {e}")))?;

    Ok(parsed
        .result
        .devices
        .into_iter()
        .filter(|d| !d.identifier.is_empty())
        .map(|d| {
            let connected =
                d.connection_properties.tunnel_state.as_deref() != Some("unavailable");
            DeviceInfo {
                udid: d.identifier,
                name: d.device_properties.name,
                kind: DeviceKind::Physical,
                os_version: d
                    .device_properties
                    .os_version_number
                    .map(|v| format!("iOS {v}")),
                booted: connected,
                available: connected,
            }
        })
        .collect())
}

async fn list_physical() -> Vec<DeviceInfo> {
    let tmp = match tempfile::Builder::new().suffix(".json").tempfile() {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(err = %e, "tempfile for devicectl listing failed");
            return Vec::new();
        }
    };

    let mut cmd = Command::new("xcrun");
    cmd.args(["devicectl", "list", "devices", "--json-output"]).arg(tmp.path());
    match run_tool("devicectl", cmd, Duration::from_secs(30)).await {
        Ok(o) if o.success() => {}
        Ok(o) => {
            tracing::debug!(stderr = %o.stderr.trim(), "devicectl list devices failed");
            return Vec::new();
        }
        Err(e) => {
            tracing::debug!(err = %e, "devicectl unavailable");
            return Vec::new();
        }
    }

    let contents = match std::fs::read_to_string(tmp.path()) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(err = %e, "devicectl output unreadable");
            return Vec::new();
        }
    };
    parse_devicectl_list(&contents).unwrap_or_else(|e| {
        tracing::debug!(err = %e, "devicectl output invalid");
        Vec::new()
    })
}

/// Enumerate all known devices. Simulator enumeration failures are errors
/// (the host is assumed to carry an Xcode toolchain); physical enumeration
/// failures degrade to an empty set.
pub async fn list_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
    let mut devices = list_simulators().await?;
    devices.extend(list_physical().await);
    Ok(devices)
}

/// Boot a simulator. "already booted" counts as success.
pub async fn boot_simulator(udid: &str) -> Result<(), DeviceError> {
    let mut cmd = Command::new("xcrun");
    cmd.args(["simctl", "boot", udid]);
    let out = run_tool("simctl", cmd, Duration::from_secs(60)).await?;
    if !out.success() && !out.stderr.contains("current state: Booted") {
        return Err(DeviceError::Unknown(format!(
            "simctl boot failed for {udid}: {}",
            out.stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
