// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device pool: resolution of logical device requests to claimed UDIDs
//! with lease semantics, plus the process-wide active device.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quern_device::discovery::DeviceInfo;
use quern_device::DeviceError;

/// A session's lease on a device.
#[derive(Debug, Clone, Serialize)]
pub struct PoolClaim {
    pub udid: String,
    pub session_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// Criteria for resolving a logical device request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveCriteria {
    /// Exact UDID.
    #[serde(default)]
    pub udid: Option<String>,
    /// Exact name (case-insensitive).
    #[serde(default)]
    pub name: Option<String>,
    /// Name substring (case-insensitive).
    #[serde(default)]
    pub name_contains: Option<String>,
    /// Only booted devices.
    #[serde(default)]
    pub booted: bool,
    /// Only available devices.
    #[serde(default)]
    pub available: bool,
}

impl ResolveCriteria {
    pub fn is_empty(&self) -> bool {
        self.udid.is_none()
            && self.name.is_none()
            && self.name_contains.is_none()
            && !self.booted
            && !self.available
    }

    fn matches(&self, device: &DeviceInfo) -> bool {
        if let Some(ref udid) = self.udid {
            if &device.udid != udid {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if !device.name.eq_ignore_ascii_case(name) {
                return false;
            }
        }
        if let Some(ref fragment) = self.name_contains {
            if !device.name.to_lowercase().contains(&fragment.to_lowercase()) {
                return false;
            }
        }
        if self.booted && !device.booted {
            return false;
        }
        if self.available && !device.available {
            return false;
        }
        true
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref udid) = self.udid {
            parts.push(format!("udid={udid}"));
        }
        if let Some(ref name) = self.name {
            parts.push(format!("name={name}"));
        }
        if let Some(ref fragment) = self.name_contains {
            parts.push(format!("name_contains={fragment}"));
        }
        if self.booted {
            parts.push("booted".to_owned());
        }
        if self.available {
            parts.push("available".to_owned());
        }
        parts.join(", ")
    }
}

#[derive(Default)]
struct PoolInner {
    active: Option<String>,
    claims: HashMap<String, PoolClaim>,
}

/// Session-scoped device leases and the active UDID used by parameter-less
/// calls.
#[derive(Default)]
pub struct DevicePool {
    inner: Mutex<PoolInner>,
}

impl DevicePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<String> {
        self.inner.lock().ok()?.active.clone()
    }

    /// First successful resolution wins; later ones keep the earlier value.
    pub fn set_active_if_unset(&self, udid: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.active.is_none() {
                inner.active = Some(udid.to_owned());
            }
        }
    }

    pub fn clear_active(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.active = None;
        }
    }

    /// Resolve criteria against an enumerated device list.
    ///
    /// Empty criteria return the active UDID. The first match becomes the
    /// active UDID when none is set yet.
    pub fn resolve(
        &self,
        devices: &[DeviceInfo],
        criteria: &ResolveCriteria,
    ) -> Result<String, DeviceError> {
        if criteria.is_empty() {
            return self.active().ok_or_else(|| {
                DeviceError::NotFound(
                    "no active device — resolve or boot a device first".to_owned(),
                )
            });
        }

        let matched = devices.iter().find(|d| criteria.matches(d)).ok_or_else(|| {
            DeviceError::NotFound(format!(
                "no device matches [{}] among {} known device(s)",
                criteria.describe(),
                devices.len()
            ))
        })?;

        self.set_active_if_unset(&matched.udid);
        Ok(matched.udid.clone())
    }

    /// Lease a device for a session. At most one active claim per UDID;
    /// re-claiming from the same session is idempotent.
    pub fn claim(&self, udid: &str, session_id: &str) -> Result<PoolClaim, DeviceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| DeviceError::Unknown("pool lock poisoned".to_owned()))?;

        if let Some(existing) = inner.claims.get(udid) {
            if existing.session_id == session_id {
                return Ok(existing.clone());
            }
            return Err(DeviceError::Validation(format!(
                "device {udid} is already claimed by session {}",
                existing.session_id
            )));
        }

        let claim = PoolClaim {
            udid: udid.to_owned(),
            session_id: session_id.to_owned(),
            claimed_at: Utc::now(),
        };
        inner.claims.insert(udid.to_owned(), claim.clone());
        Ok(claim)
    }

    /// Release a lease. Returns `false` when there was nothing to release.
    pub fn release(&self, udid: &str, session_id: &str) -> Result<bool, DeviceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| DeviceError::Unknown("pool lock poisoned".to_owned()))?;

        match inner.claims.get(udid) {
            None => Ok(false),
            Some(existing) if existing.session_id != session_id => {
                Err(DeviceError::Validation(format!(
                    "device {udid} is claimed by session {}, not {session_id}",
                    existing.session_id
                )))
            }
            Some(_) => {
                inner.claims.remove(udid);
                Ok(true)
            }
        }
    }

    /// Drop every lease and the active device (server shutdown).
    pub fn release_all(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.claims.clear();
            inner.active = None;
        }
    }

    pub fn claims(&self) -> Vec<PoolClaim> {
        self.inner.lock().map(|inner| inner.claims.values().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
