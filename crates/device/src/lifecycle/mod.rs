// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WDA lifecycle manager: clone, customize, build, sign, install, and the
//! driver process itself.

pub mod driver;
pub mod project;

use serde::Serialize;

use crate::error::DeviceError;
use crate::identity::{discover_signing_teams, SigningTeam};
use crate::state;

pub use driver::{start_driver, stop_driver, DriverState, DriverStatus};

/// Result of a setup request.
///
/// `NeedsIdentitySelection` is a normal outcome, not an error: the host has
/// several signing teams and the caller must pick one.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SetupOutcome {
    Ok {
        udid: String,
        team_id: String,
        cloned: bool,
        built: bool,
        installed: bool,
    },
    NeedsIdentitySelection {
        identities: Vec<SigningTeam>,
        message: String,
    },
}

/// Full WDA setup: discover signing teams, resolve the team to use, clone,
/// customize, build, install.
pub async fn setup(
    udid: &str,
    os_version: &str,
    team_id: Option<&str>,
) -> Result<SetupOutcome, DeviceError> {
    let identities = discover_signing_teams();
    if identities.is_empty() {
        return Err(DeviceError::Unavailable(
            "No provisioning teams found in Xcode preferences. Open Xcode → Settings → \
             Accounts and sign in with an Apple Developer account."
                .to_owned(),
        ));
    }

    let team_id = match resolve_team(team_id, &identities).await? {
        TeamResolution::Selected(id) => id,
        TeamResolution::NeedsSelection => {
            return Ok(SetupOutcome::NeedsIdentitySelection {
                identities,
                message: "Multiple signing identities found. Call again with team_id set to \
                          one of the listed team IDs."
                    .to_owned(),
            });
        }
    };

    let cloned = project::clone_sources().await?;
    state::update_state(|s| {
        s.cloned = true;
    })
    .await?;

    let repo = crate::paths::wda_repo_dir();
    tokio::task::spawn_blocking(move || project::customize_project(&repo))
        .await
        .map_err(|e| DeviceError::Unknown(format!("customize task failed: {e}")))??;

    let built = project::build(&team_id).await?;
    project::install(udid, os_version).await?;

    Ok(SetupOutcome::Ok {
        udid: udid.to_owned(),
        team_id,
        cloned,
        built,
        installed: true,
    })
}

#[derive(Debug)]
enum TeamResolution {
    Selected(String),
    NeedsSelection,
}

/// Team resolution ladder: explicit choice, previously persisted team (if
/// still valid), sole candidate, otherwise punt to the caller.
async fn resolve_team(
    requested: Option<&str>,
    identities: &[SigningTeam],
) -> Result<TeamResolution, DeviceError> {
    let valid = |id: &str| identities.iter().any(|t| t.team_id == id);

    if let Some(id) = requested {
        if !valid(id) {
            let mut available: Vec<&str> = identities.iter().map(|t| t.team_id.as_str()).collect();
            available.sort_unstable();
            return Err(DeviceError::Validation(format!(
                "team_id '{id}' not found in available identities. Available: {available:?}"
            )));
        }
        return Ok(TeamResolution::Selected(id.to_owned()));
    }

    let saved = state::read_state().await.build_team_id;
    if let Some(saved) = saved.filter(|id| valid(id)) {
        tracing::info!(team = %saved, "reusing previously selected team");
        return Ok(TeamResolution::Selected(saved));
    }

    if identities.len() == 1 {
        return Ok(TeamResolution::Selected(identities[0].team_id.clone()));
    }

    Ok(TeamResolution::NeedsSelection)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
