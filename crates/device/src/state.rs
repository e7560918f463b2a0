// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-safe WDA state store.
//!
//! One JSON file guarded by OS advisory locks: shared for reads, exclusive
//! for writes. Readers tolerate a missing, empty, or corrupt file by
//! degrading to the default state — decode errors never propagate.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::paths;

/// Persisted WDA state: clone/build/install progress plus running driver
/// PIDs. The schema is a stable contract shared with external tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WdaState {
    #[serde(default)]
    pub cloned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub installs: HashMap<String, InstallRecord>,
    #[serde(default)]
    pub runners: HashMap<String, RunnerRecord>,
}

/// Observational marker that an install completed for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub installed_at: DateTime<Utc>,
}

/// A spawned driver process. Written on successful spawn, cleared on stop
/// or when a dead PID is detected during start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRecord {
    pub pid: i32,
    pub started_at: DateTime<Utc>,
    pub os_version: String,
}

/// Read state from `path` under a shared lock.
pub fn read_state_at(path: &Path) -> WdaState {
    if !path.exists() {
        return WdaState::default();
    }

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(err = %e, "failed to open WDA state file");
            return WdaState::default();
        }
    };

    let mut locked = match Flock::lock(file, FlockArg::LockShared) {
        Ok(l) => l,
        Err((_file, errno)) => {
            tracing::warn!(err = %errno, "failed to lock WDA state file for read");
            return WdaState::default();
        }
    };

    let mut contents = String::new();
    if let Err(e) = locked.read_to_string(&mut contents) {
        tracing::warn!(err = %e, "failed to read WDA state file");
        return WdaState::default();
    }

    if contents.trim().is_empty() {
        return WdaState::default();
    }

    match serde_json::from_str(&contents) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(err = %e, "corrupt WDA state file, using defaults");
            WdaState::default()
        }
    }
}

/// Write state to `path` under an exclusive lock.
///
/// Truncation happens only after the lock is held, so a reader taking the
/// shared lock never observes partial content.
pub fn save_state_at(path: &Path, state: &WdaState) -> Result<(), DeviceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DeviceError::Unknown(format!("cannot create {}: {e}", parent.display())))?;
    }

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| DeviceError::Unknown(format!("cannot open state file: {e}")))?;

    let mut locked = Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_file, errno)| DeviceError::Unknown(format!("flock failed: {errno}")))?;

    let json = serde_json::to_string_pretty(state)
        .map_err(|e| DeviceError::Unknown(format!("state serialization failed: {e}")))?;

    let write = |locked: &mut Flock<std::fs::File>| -> std::io::Result<()> {
        locked.set_len(0)?;
        locked.seek(SeekFrom::Start(0))?;
        locked.write_all(json.as_bytes())?;
        locked.flush()
    };
    write(&mut locked).map_err(|e| DeviceError::Unknown(format!("state write failed: {e}")))?;

    Ok(())
}

fn default_path() -> PathBuf {
    paths::state_file()
}

/// Async read of the default state file. The lock wait runs on the
/// blocking pool.
pub async fn read_state() -> WdaState {
    let path = default_path();
    tokio::task::spawn_blocking(move || read_state_at(&path)).await.unwrap_or_default()
}

/// Async write of the default state file.
pub async fn save_state(state: WdaState) -> Result<(), DeviceError> {
    let path = default_path();
    tokio::task::spawn_blocking(move || save_state_at(&path, &state))
        .await
        .map_err(|e| DeviceError::Unknown(format!("state writer task failed: {e}")))?
}

/// Read-modify-write helper for the default state file.
pub async fn update_state<F>(mutate: F) -> Result<WdaState, DeviceError>
where
    F: FnOnce(&mut WdaState) + Send + 'static,
{
    let path = default_path();
    tokio::task::spawn_blocking(move || {
        let mut state = read_state_at(&path);
        mutate(&mut state);
        save_state_at(&path, &state)?;
        Ok(state)
    })
    .await
    .map_err(|e| DeviceError::Unknown(format!("state writer task failed: {e}")))?
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
