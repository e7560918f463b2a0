// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device controller: resolves logical device requests, validates device
//! kinds, and drives the WDA client for UI operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use quern_device::discovery::{self, DeviceInfo};
use quern_device::elements::{self, Element, ElementFilter};
use quern_device::lifecycle::{self, DriverStatus, SetupOutcome};
use quern_device::summary::{generate_screen_summary, ScreenSummary};
use quern_device::{DeviceError, WdaClient};

use crate::pool::{DevicePool, PoolClaim, ResolveCriteria};

/// How devices are enumerated: live toolchain calls, or a fixed list for
/// embedding and tests.
enum DeviceSource {
    Live,
    Fixed(Vec<DeviceInfo>),
}

pub struct Controller {
    client: WdaClient,
    pool: DevicePool,
    devices: DeviceSource,
}

/// A single-element lookup result; `match_count` is present when the
/// search was ambiguous.
#[derive(Debug, Clone, Serialize)]
pub struct ElementMatch {
    pub element: Element,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_count: Option<usize>,
}

/// Outcome of tap-element: single hit tapped, or the ambiguous match list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TapOutcome {
    Ok { udid: String, tapped: Element, x: f64, y: f64 },
    Ambiguous { udid: String, matches: Vec<Element>, match_count: usize },
}

/// Parameters for the server-side element wait.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitParams {
    pub condition: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default, rename = "type")]
    pub element_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "default_wait_timeout")]
    pub timeout: f64,
    #[serde(default = "default_wait_interval")]
    pub interval: f64,
    #[serde(default)]
    pub udid: Option<String>,
}

fn default_wait_timeout() -> f64 {
    10.0
}

fn default_wait_interval() -> f64 {
    0.5
}

/// Wait result. Always a success shape — a timeout is `matched: false`
/// with the last observed state, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct WaitResult {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<Element>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_state: Option<Element>,
    pub elapsed_seconds: f64,
    pub polls: u32,
}

impl Controller {
    pub fn new() -> Self {
        Self { client: WdaClient::new(), pool: DevicePool::new(), devices: DeviceSource::Live }
    }

    /// A controller over a fixed device list. Discovery never shells out —
    /// used by embedders and the HTTP tests.
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            client: WdaClient::new(),
            pool: DevicePool::new(),
            devices: DeviceSource::Fixed(devices),
        }
    }

    pub fn client(&self) -> &WdaClient {
        &self.client
    }

    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Device resolution
    // ------------------------------------------------------------------

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let devices = match &self.devices {
            DeviceSource::Fixed(devices) => devices.clone(),
            DeviceSource::Live => discovery::list_devices().await?,
        };
        // The client needs OS versions for driver auto-start.
        for device in devices.iter().filter(|d| d.is_physical()) {
            if let Some(ref os_version) = device.os_version {
                self.client.set_os_version(&device.udid, os_version);
            }
        }
        Ok(devices)
    }

    pub async fn device(&self, udid: &str) -> Result<DeviceInfo, DeviceError> {
        self.list_devices()
            .await?
            .into_iter()
            .find(|d| d.udid == udid)
            .ok_or_else(|| DeviceError::NotFound(format!("Device {udid} not found")))
    }

    /// Resolve an optional UDID: explicit value, else the active device,
    /// else the first booted device (which becomes active).
    pub async fn resolve_udid(&self, udid: Option<&str>) -> Result<String, DeviceError> {
        if let Some(udid) = udid {
            let device = self.device(udid).await?;
            self.pool.set_active_if_unset(&device.udid);
            return Ok(device.udid);
        }

        if let Some(active) = self.pool.active() {
            return Ok(active);
        }

        let devices = self.list_devices().await?;
        let booted = devices.iter().find(|d| d.booted).ok_or_else(|| {
            DeviceError::NotFound(
                "no UDID given, no active device, and no booted device to fall back to"
                    .to_owned(),
            )
        })?;
        self.pool.set_active_if_unset(&booted.udid);
        Ok(booted.udid.clone())
    }

    fn require_physical(device: &DeviceInfo, operation: &str) -> Result<(), DeviceError> {
        if device.is_physical() {
            return Ok(());
        }
        Err(DeviceError::Validation(format!(
            "Device {} is a simulator. {operation} is only supported on physical devices.",
            device.udid
        )))
    }

    /// Resolve a UDID for a UI operation and check it is a physical device.
    async fn ui_device(&self, udid: Option<&str>) -> Result<String, DeviceError> {
        let udid = self.resolve_udid(udid).await?;
        let device = self.device(&udid).await?;
        Self::require_physical(&device, "UI automation")?;
        Ok(udid)
    }

    // ------------------------------------------------------------------
    // UI inspection
    // ------------------------------------------------------------------

    async fn raw_elements(
        &self,
        udid: &str,
        snapshot_depth: Option<u32>,
        strategy: Option<&str>,
    ) -> Result<Vec<quern_device::elements::AxElement>, DeviceError> {
        match strategy {
            Some("skeleton") => self.client.build_screen_skeleton(udid).await,
            Some(other) => Err(DeviceError::Validation(format!(
                "unknown strategy {other:?} — expected \"skeleton\""
            ))),
            None => self.client.describe_all(udid, snapshot_depth).await,
        }
    }

    pub async fn get_ui_elements(
        &self,
        udid: Option<&str>,
        snapshot_depth: Option<u32>,
        strategy: Option<&str>,
    ) -> Result<(Vec<Element>, String), DeviceError> {
        let udid = self.ui_device(udid).await?;
        let raw = self.raw_elements(&udid, snapshot_depth, strategy).await?;
        Ok((elements::parse_elements(&raw, &ElementFilter::default()), udid))
    }

    /// Elements scoped to the subtree under the node matching
    /// `children_of` by identifier or label.
    pub async fn get_ui_elements_children_of(
        &self,
        children_of: &str,
        udid: Option<&str>,
        snapshot_depth: Option<u32>,
    ) -> Result<(Vec<Element>, String), DeviceError> {
        let udid = self.ui_device(udid).await?;
        let tree = self.client.describe_all_nested(&udid, snapshot_depth).await?;
        let subtree = elements::find_children_of(&tree, Some(children_of), Some(children_of));
        Ok((elements::parse_elements(&subtree, &ElementFilter::default()), udid))
    }

    async fn find_matches(
        &self,
        udid: &str,
        label: Option<&str>,
        identifier: Option<&str>,
        element_type: Option<&str>,
    ) -> Result<Vec<Element>, DeviceError> {
        if label.is_none() && identifier.is_none() {
            return Err(DeviceError::Validation(
                "at least one of label or identifier is required".to_owned(),
            ));
        }

        let raw = self.client.describe_all(udid, None).await?;
        // Pushdown: parse only records that can match the primary filter.
        let filter = ElementFilter {
            label: label.map(str::to_owned),
            identifier: identifier.map(str::to_owned),
            kind: element_type.map(str::to_owned),
        };
        let parsed = elements::parse_elements(&raw, &filter);
        Ok(elements::find_element(&parsed, label, identifier, element_type)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn get_element(
        &self,
        label: Option<&str>,
        identifier: Option<&str>,
        element_type: Option<&str>,
        udid: Option<&str>,
    ) -> Result<(ElementMatch, String), DeviceError> {
        let udid = self.ui_device(udid).await?;
        let matches = self.find_matches(&udid, label, identifier, element_type).await?;

        let Some(first) = matches.first() else {
            return Err(DeviceError::NotFound(format!(
                "no element matches label={label:?} identifier={identifier:?} type={element_type:?}"
            )));
        };

        let match_count = if matches.len() > 1 { Some(matches.len()) } else { None };
        Ok((ElementMatch { element: first.clone(), match_count }, udid))
    }

    /// Server-side poll until an element satisfies a condition.
    pub async fn wait_for_element(
        &self,
        params: &WaitParams,
    ) -> Result<(WaitResult, String), DeviceError> {
        let udid = self.ui_device(params.udid.as_deref()).await?;

        let started = std::time::Instant::now();
        let timeout = Duration::from_secs_f64(params.timeout.max(0.0));
        let interval = Duration::from_secs_f64(params.interval.clamp(0.05, 10.0));
        let mut polls: u32 = 0;
        let mut last_state: Option<Element> = None;

        loop {
            polls += 1;
            let matches = self
                .find_matches(
                    &udid,
                    params.label.as_deref(),
                    params.identifier.as_deref(),
                    params.element_type.as_deref(),
                )
                .await?;
            let first = matches.first().cloned();
            if let Some(ref el) = first {
                last_state = Some(el.clone());
            }

            let matched = evaluate_condition(&params.condition, first.as_ref(), &params.value)?;
            if matched {
                return Ok((
                    WaitResult {
                        matched: true,
                        element: first,
                        last_state: None,
                        elapsed_seconds: round2(started.elapsed().as_secs_f64()),
                        polls,
                    },
                    udid,
                ));
            }

            if started.elapsed() >= timeout {
                return Ok((
                    WaitResult {
                        matched: false,
                        element: None,
                        last_state,
                        elapsed_seconds: round2(started.elapsed().as_secs_f64()),
                        polls,
                    },
                    udid,
                ));
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn get_screen_summary(
        &self,
        max_elements: usize,
        udid: Option<&str>,
        snapshot_depth: Option<u32>,
        strategy: Option<&str>,
    ) -> Result<(ScreenSummary, String), DeviceError> {
        let udid = self.ui_device(udid).await?;
        let raw = self.raw_elements(&udid, snapshot_depth, strategy).await?;
        let parsed = elements::parse_elements(&raw, &ElementFilter::default());
        Ok((generate_screen_summary(&parsed, max_elements), udid))
    }

    // ------------------------------------------------------------------
    // UI interaction
    // ------------------------------------------------------------------

    pub async fn tap(&self, x: f64, y: f64, udid: Option<&str>) -> Result<String, DeviceError> {
        let udid = self.ui_device(udid).await?;
        self.client.tap(&udid, x, y).await?;
        Ok(udid)
    }

    pub async fn tap_element(
        &self,
        label: Option<&str>,
        identifier: Option<&str>,
        element_type: Option<&str>,
        udid: Option<&str>,
    ) -> Result<TapOutcome, DeviceError> {
        let udid = self.ui_device(udid).await?;
        let matches = self.find_matches(&udid, label, identifier, element_type).await?;

        match matches.len() {
            0 => Err(DeviceError::NotFound(format!(
                "no element matches label={label:?} identifier={identifier:?} type={element_type:?}"
            ))),
            1 => {
                let element = matches.into_iter().next().ok_or_else(|| {
                    DeviceError::Unknown("match list emptied unexpectedly".to_owned())
                })?;
                let (x, y) = elements::center(&element)?;
                self.client.tap(&udid, x, y).await?;
                Ok(TapOutcome::Ok { udid, tapped: element, x, y })
            }
            n => Ok(TapOutcome::Ambiguous { udid, matches, match_count: n }),
        }
    }

    pub async fn swipe(
        &self,
        start_x: f64,
        start_y: f64,
        end_x: f64,
        end_y: f64,
        duration: f64,
        udid: Option<&str>,
    ) -> Result<String, DeviceError> {
        let udid = self.ui_device(udid).await?;
        self.client.swipe(&udid, start_x, start_y, end_x, end_y, duration).await?;
        Ok(udid)
    }

    pub async fn type_text(&self, text: &str, udid: Option<&str>) -> Result<String, DeviceError> {
        let udid = self.ui_device(udid).await?;
        self.client.type_text(&udid, text).await?;
        Ok(udid)
    }

    pub async fn clear_text(
        &self,
        x: f64,
        y: f64,
        element_type: Option<&str>,
        udid: Option<&str>,
    ) -> Result<String, DeviceError> {
        let udid = self.ui_device(udid).await?;
        self.client.clear_text(&udid, x, y, element_type).await?;
        Ok(udid)
    }

    pub async fn press_button(
        &self,
        button: &str,
        udid: Option<&str>,
    ) -> Result<String, DeviceError> {
        let udid = self.ui_device(udid).await?;
        self.client.press_button(&udid, button).await?;
        Ok(udid)
    }

    // ------------------------------------------------------------------
    // WDA lifecycle
    // ------------------------------------------------------------------

    /// Validate a UDID for a WDA lifecycle operation: the device must exist,
    /// be physical, and report an OS version.
    async fn wda_device(&self, udid: &str, operation: &str) -> Result<DeviceInfo, DeviceError> {
        let device = self.device(udid).await?;
        Self::require_physical(&device, operation)?;
        if device.os_version.is_none() {
            return Err(DeviceError::Validation(format!(
                "Device {udid} has no OS version info. Is it connected?"
            )));
        }
        Ok(device)
    }

    pub async fn setup_wda(
        &self,
        udid: &str,
        team_id: Option<&str>,
    ) -> Result<SetupOutcome, DeviceError> {
        let device = self.wda_device(udid, "WDA setup").await?;
        let os_version = device.os_version.unwrap_or_default();
        lifecycle::setup(udid, &os_version, team_id).await
    }

    pub async fn start_wda(&self, udid: &str) -> Result<DriverStatus, DeviceError> {
        let device = self.wda_device(udid, "WDA start").await?;
        let os_version = device.os_version.unwrap_or_default();
        lifecycle::start_driver(udid, &os_version).await
    }

    pub async fn stop_wda(&self, udid: &str) -> Result<DriverStatus, DeviceError> {
        self.wda_device(udid, "WDA stop").await?;
        // Tear down the session first so the driver exits cleanly.
        self.client.delete_session(udid).await;
        lifecycle::stop_driver(udid).await
    }

    // ------------------------------------------------------------------
    // Pool operations
    // ------------------------------------------------------------------

    pub async fn resolve_device(&self, criteria: &ResolveCriteria) -> Result<String, DeviceError> {
        let devices = self.list_devices().await?;
        self.pool.resolve(&devices, criteria)
    }

    /// Make sure `count` matching devices are booted, booting simulators as
    /// needed (physical devices are never auto-booted). Returns the first
    /// `count` UDIDs; the first becomes active.
    pub async fn ensure_devices(
        &self,
        count: usize,
        name_contains: Option<&str>,
    ) -> Result<Vec<String>, DeviceError> {
        let devices = self.list_devices().await?;
        let fragment = name_contains.map(str::to_lowercase);
        let matching: Vec<&DeviceInfo> = devices
            .iter()
            .filter(|d| d.available)
            .filter(|d| match fragment {
                Some(ref f) => d.name.to_lowercase().contains(f),
                None => true,
            })
            .collect();

        let mut ready: Vec<String> =
            matching.iter().filter(|d| d.booted).map(|d| d.udid.clone()).collect();

        if ready.len() < count {
            let needed = count - ready.len();
            let bootable: Vec<&&DeviceInfo> =
                matching.iter().filter(|d| !d.booted && !d.is_physical()).collect();
            if bootable.len() < needed {
                return Err(DeviceError::NotFound(format!(
                    "need {count} device(s) but only {} booted and {} bootable match the filter",
                    ready.len(),
                    bootable.len()
                )));
            }
            for device in bootable.into_iter().take(needed) {
                discovery::boot_simulator(&device.udid).await?;
                ready.push(device.udid.clone());
            }
        }

        ready.truncate(count);
        if let Some(first) = ready.first() {
            self.pool.set_active_if_unset(first);
        }
        Ok(ready)
    }

    pub fn claim(&self, udid: &str, session_id: &str) -> Result<PoolClaim, DeviceError> {
        self.pool.claim(udid, session_id)
    }

    pub fn release(&self, udid: &str, session_id: &str) -> Result<bool, DeviceError> {
        self.pool.release(udid, session_id)
    }

    pub fn active_udid(&self) -> Option<String> {
        self.pool.active()
    }

    /// Server shutdown: tear down the WDA client and drop every lease.
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
        self.pool.release_all();
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Evaluate a wait condition against the first matching element.
fn evaluate_condition(
    condition: &str,
    element: Option<&Element>,
    value: &Option<String>,
) -> Result<bool, DeviceError> {
    match condition {
        "exists" => Ok(element.is_some()),
        "not_exists" => Ok(element.is_none()),
        "enabled" => Ok(element.is_some_and(|e| e.enabled)),
        "disabled" => Ok(element.is_some_and(|e| !e.enabled)),
        "value_equals" => {
            let want = value.as_deref().unwrap_or_default();
            Ok(element.and_then(|e| e.value.as_deref()) == Some(want))
        }
        "value_contains" => {
            let want = value.as_deref().unwrap_or_default();
            Ok(element.and_then(|e| e.value.as_deref()).is_some_and(|v| v.contains(want)))
        }
        other => Err(DeviceError::Validation(format!(
            "unknown condition {other:?} — expected one of exists, not_exists, enabled, \
             disabled, value_equals, value_contains"
        ))),
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
