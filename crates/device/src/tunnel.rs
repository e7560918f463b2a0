// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote-tunnel daemon queries and hardware-UDID resolution.
//!
//! The tunnel daemon publishes IPv6 endpoints for iOS developer services,
//! keyed by hardware UDID. Hosts address physical devices by CoreDevice
//! UUID, so reaching a tunnel means resolving one identifier to the other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use crate::proc::run_tool;

/// HTTP index of the remote-tunnel daemon.
pub const TUNNELD_URL: &str = "http://127.0.0.1:49151";

/// One tunnel published by the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelInfo {
    #[serde(rename = "tunnel-address")]
    pub tunnel_address: Option<String>,
    #[serde(rename = "tunnel-port")]
    pub tunnel_port: Option<u16>,
}

// CoreDevice UUID → hardware UDID. The mapping is stable for the lifetime
// of the process.
static UDID_CACHE: Mutex<Option<HashMap<String, String>>> = Mutex::new(None);

fn cache_get(coredevice_uuid: &str) -> Option<String> {
    let guard = UDID_CACHE.lock().ok()?;
    guard.as_ref()?.get(coredevice_uuid).cloned()
}

fn cache_put(coredevice_uuid: &str, hardware_udid: &str) {
    if let Ok(mut guard) = UDID_CACHE.lock() {
        guard
            .get_or_insert_with(HashMap::new)
            .insert(coredevice_uuid.to_owned(), hardware_udid.to_owned());
    }
}

/// Query the tunnel daemon for connected device tunnels.
///
/// Returns a map of hardware UDID → tunnels. Empty on any error — an
/// unreachable daemon just means no tunneled devices.
pub async fn tunneld_devices(http: &reqwest::Client) -> HashMap<String, Vec<TunnelInfo>> {
    tunneld_devices_at(http, TUNNELD_URL).await
}

pub async fn tunneld_devices_at(
    http: &reqwest::Client,
    url: &str,
) -> HashMap<String, Vec<TunnelInfo>> {
    let resp = match http.get(url).timeout(Duration::from_secs(5)).send().await {
        Ok(r) if r.status().is_success() => r,
        _ => return HashMap::new(),
    };
    resp.json().await.unwrap_or_default()
}

/// Map a CoreDevice UUID to the tunnel daemon's hardware UDID.
///
/// Single tunneled device: assume it is the target. Otherwise ask
/// devicectl, whose listing carries both identifiers.
pub async fn resolve_tunnel_udid(http: &reqwest::Client, coredevice_uuid: &str) -> Option<String> {
    resolve_tunnel_udid_at(http, TUNNELD_URL, coredevice_uuid).await
}

pub async fn resolve_tunnel_udid_at(
    http: &reqwest::Client,
    tunneld_url: &str,
    coredevice_uuid: &str,
) -> Option<String> {
    if let Some(cached) = cache_get(coredevice_uuid) {
        return Some(cached);
    }

    let devices = tunneld_devices_at(http, tunneld_url).await;
    if devices.is_empty() {
        return None;
    }

    if devices.len() == 1 {
        if let Some(udid) = devices.keys().next() {
            cache_put(coredevice_uuid, udid);
            return Some(udid.clone());
        }
    }

    // Multiple tunnels: devicectl lists both the CoreDevice UUID and the
    // hardware UDID for every connected device.
    match devicectl_identifier_map().await {
        Ok(map) => {
            for (cd_uuid, hw_udid) in &map {
                if devices.contains_key(hw_udid) {
                    cache_put(cd_uuid, hw_udid);
                }
            }
        }
        Err(e) => {
            tracing::debug!(err = %e, "failed to map CoreDevice UUIDs via devicectl");
        }
    }

    cache_get(coredevice_uuid)
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
    #[serde(default, rename = "hardwareProperties")]
    hardware_properties: DevicectlHardware,
}

#[derive(Debug, Default, Deserialize)]
struct DevicectlHardware {
    #[serde(default)]
    udid: String,
}

/// CoreDevice UUID → hardware UDID pairs from `devicectl list devices`.
async fn devicectl_identifier_map() -> Result<Vec<(String, String)>, crate::DeviceError> {
    let tmp = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .map_err(|e| crate::DeviceError::Unknown(format!("tempfile failed: {e}")))?;
    let json_path: PathBuf = tmp.path().to_path_buf();

    let mut cmd = Command::new("xcrun");
    cmd.args(["devicectl", "list", "devices", "--json-output"]).arg(&json_path);
    let out = run_tool("devicectl", cmd, Duration::from_secs(30)).await?;
    if !out.success() {
        return Err(crate::DeviceError::Unknown(format!(
            "devicectl list devices failed: {}",
            out.stderr.trim()
        )));
    }

    let contents = std::fs::read_to_string(&json_path)
        .map_err(|e| crate::DeviceError::Unknown(format!("devicectl output unreadable: {e}")))?;
    let parsed: DevicectlOutput = serde_json::from_str(&contents)
        .map_err(|e| crate::DeviceError::Unknown(format!("devicectl output invalid: {e}")))?;

    Ok(parsed
        .result
        .devices
        .into_iter()
        .filter(|d| !d.identifier.is_empty() && !d.hardware_properties.udid.is_empty())
        .map(|d| (d.identifier, d.hardware_properties.udid))
        .collect())
}

/// Locate the USB-mux forwarder binary: PATH first, then the common pipx
/// install location (symlinks resolved — some callers need the real path).
pub fn find_forwarder_binary() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join("pymobiledevice3");
        if candidate.is_file() {
            return candidate.canonicalize().ok().or(Some(candidate));
        }
    }

    let home = std::env::var("HOME").ok()?;
    let pipx = PathBuf::from(home)
        .join(".local")
        .join("pipx")
        .join("venvs")
        .join("pymobiledevice3")
        .join("bin")
        .join("pymobiledevice3");
    if pipx.exists() {
        return pipx.canonicalize().ok().or(Some(pipx));
    }
    None
}

/// First usable tunnel address for a device, as a WDA base URL.
pub fn tunnel_base_url(tunnels: &[TunnelInfo], wda_port: u16) -> Option<String> {
    let addr = tunnels.first()?.tunnel_address.as_deref()?;
    // IPv6 addresses need brackets in URLs.
    Some(format!("http://[{addr}]:{wda_port}"))
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
