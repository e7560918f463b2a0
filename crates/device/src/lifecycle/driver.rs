// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver process lifecycle: spawn the test runner detached, poll for
//! readiness, stop it gracefully.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::error::DeviceError;
use crate::proc::{self, is_process_alive};
use crate::state::{self, RunnerRecord};
use crate::tunnel;
use crate::{paths, short_udid};

const READY_TIMEOUT: Duration = Duration::from_secs(60);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(5);
const WDA_PORT: u16 = 8100;

/// Outcome of a start or stop request.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub status: DriverState,
    pub udid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
}

/// Rename upstream's version-specific `*.xctestrun` to the stable name.
///
/// Runs once per build; a no-op when the stable file already exists or no
/// xctestrun has been produced yet.
pub fn rename_xctestrun_in(products: &Path) -> Result<(), DeviceError> {
    let stable = products.join("quern-driver.xctestrun");
    if stable.exists() {
        return Ok(());
    }

    let Some(candidate) = first_xctestrun(products) else {
        return Ok(());
    };
    std::fs::rename(&candidate, &stable)
        .map_err(|e| DeviceError::Unknown(format!("xctestrun rename failed: {e}")))?;
    tracing::info!(from = %candidate.display(), to = %stable.display(), "renamed xctestrun");
    Ok(())
}

/// Locate the test bundle description: stable name first, any `*.xctestrun`
/// as a fallback.
pub fn find_xctestrun_in(products: &Path) -> Result<PathBuf, DeviceError> {
    let stable = products.join("quern-driver.xctestrun");
    if stable.exists() {
        return Ok(stable);
    }
    first_xctestrun(products).ok_or_else(|| {
        DeviceError::NotFound(format!(
            "No .xctestrun file found under {} — run setup first",
            products.display()
        ))
    })
}

fn first_xctestrun(products: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(products).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "xctestrun"))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

pub fn rename_xctestrun() -> Result<(), DeviceError> {
    rename_xctestrun_in(&paths::products_dir())
}

pub fn find_xctestrun() -> Result<PathBuf, DeviceError> {
    find_xctestrun_in(&paths::products_dir())
}

/// Start the WDA driver on a device.
///
/// A recorded live PID short-circuits to `already_running`; a stale record
/// is cleared. The runner is spawned detached with its output redirected to
/// the per-device log, the PID is recorded immediately, and readiness is
/// polled afterwards — a started-but-not-ready driver stays recorded so the
/// caller can retry without a restart.
pub async fn start_driver(udid: &str, os_version: &str) -> Result<DriverStatus, DeviceError> {
    start_driver_with_ready_timeout(udid, os_version, READY_TIMEOUT).await
}

pub async fn start_driver_with_ready_timeout(
    udid: &str,
    os_version: &str,
    ready_timeout: Duration,
) -> Result<DriverStatus, DeviceError> {
    let state = state::read_state().await;
    if let Some(record) = state.runners.get(udid) {
        if is_process_alive(record.pid) {
            tracing::info!(udid = %short_udid(udid), pid = record.pid, "driver already running");
            return Ok(DriverStatus {
                status: DriverState::AlreadyRunning,
                udid: udid.to_owned(),
                pid: Some(record.pid),
                ready: None,
            });
        }
        tracing::info!(udid = %short_udid(udid), pid = record.pid, "clearing stale driver record");
        let dead = udid.to_owned();
        state::update_state(move |s| {
            s.runners.remove(&dead);
        })
        .await?;
    }

    rename_xctestrun()?;
    let xctestrun = find_xctestrun()?;

    let log_path = paths::runner_log(udid);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DeviceError::Unknown(format!("cannot create log dir: {e}")))?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| DeviceError::Unknown(format!("cannot open driver log: {e}")))?;
    let log_err = log_file
        .try_clone()
        .map_err(|e| DeviceError::Unknown(format!("cannot clone log handle: {e}")))?;

    let mut cmd = tokio::process::Command::new("xcodebuild");
    cmd.arg("test-without-building")
        .arg("-xctestrun")
        .arg(&xctestrun)
        .arg("-destination")
        .arg(format!("id={udid}"))
        .stdin(std::process::Stdio::null())
        .stdout(log_file)
        .stderr(log_err)
        // Detach into its own process group so the driver outlives us.
        .process_group(0);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeviceError::ToolchainMissing {
                tool: "xcodebuild".to_owned(),
                hint: "Install Xcode command line tools.".to_owned(),
            }
        } else {
            DeviceError::Unknown(format!("failed to spawn xcodebuild: {e}"))
        }
    })?;
    let pid = child.id().map(|p| p as i32).ok_or_else(|| {
        DeviceError::Unknown("xcodebuild exited before a PID could be recorded".to_owned())
    })?;
    // Dropping the handle leaves the detached process running.
    drop(child);

    let record = RunnerRecord { pid, started_at: Utc::now(), os_version: os_version.to_owned() };
    let owner = udid.to_owned();
    state::update_state(move |s| {
        s.runners.insert(owner, record);
    })
    .await?;
    tracing::info!(udid = %short_udid(udid), pid, log = %log_path.display(), "driver spawned");

    let ready = wait_until_ready(udid, ready_timeout).await;
    if !ready {
        tracing::warn!(udid = %short_udid(udid), "driver started but not yet responsive");
    }

    Ok(DriverStatus {
        status: DriverState::Started,
        udid: udid.to_owned(),
        pid: Some(pid),
        ready: Some(ready),
    })
}

/// Poll the device's WDA endpoint via the tunnel daemon until `/status`
/// answers 200. Devices without a tunnel (iOS < 17) cannot be probed here;
/// the client's forward path verifies them on first use instead.
async fn wait_until_ready(udid: &str, timeout: Duration) -> bool {
    let http = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if let Some(hw_udid) = tunnel::resolve_tunnel_udid(&http, udid).await {
            let devices = tunnel::tunneld_devices(&http).await;
            if let Some(tunnels) = devices.get(&hw_udid) {
                if let Some(base_url) = tunnel::tunnel_base_url(tunnels, WDA_PORT) {
                    let probe = http
                        .get(format!("{base_url}/status"))
                        .timeout(Duration::from_secs(2))
                        .send()
                        .await;
                    if matches!(probe, Ok(resp) if resp.status().is_success()) {
                        return true;
                    }
                }
            }
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
    false
}

/// Stop the WDA driver on a device: graceful termination first, SIGKILL
/// if it lingers. The runner record is cleared either way.
pub async fn stop_driver(udid: &str) -> Result<DriverStatus, DeviceError> {
    let state = state::read_state().await;
    let Some(record) = state.runners.get(udid) else {
        return Ok(DriverStatus {
            status: DriverState::NotRunning,
            udid: udid.to_owned(),
            pid: None,
            ready: None,
        });
    };
    let pid = record.pid;

    let clear = {
        let owner = udid.to_owned();
        move |s: &mut state::WdaState| {
            s.runners.remove(&owner);
        }
    };

    if !is_process_alive(pid) {
        state::update_state(clear).await?;
        return Ok(DriverStatus {
            status: DriverState::NotRunning,
            udid: udid.to_owned(),
            pid: None,
            ready: None,
        });
    }

    proc::terminate(pid);
    let deadline = tokio::time::Instant::now() + STOP_GRACE;
    while is_process_alive(pid) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if is_process_alive(pid) {
        tracing::warn!(udid = %short_udid(udid), pid, "driver ignored SIGTERM, killing");
        proc::kill(pid);
    }

    state::update_state(clear).await?;
    tracing::info!(udid = %short_udid(udid), pid, "driver stopped");
    Ok(DriverStatus {
        status: DriverState::Stopped,
        udid: udid.to_owned(),
        pid: Some(pid),
        ready: None,
    })
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
