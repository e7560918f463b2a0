// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Code-signing team discovery from Xcode's account preferences.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths;

/// A provisioning team known to Xcode.
///
/// `team_id` is the Xcode / App Store Connect team ID — not the
/// Organizational Unit from the keychain certificate. Only the former is
/// accepted by xcodebuild's `DEVELOPMENT_TEAM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningTeam {
    pub team_id: String,
    pub team_name: String,
    pub team_type: String,
}

/// Read provisioning teams from Xcode's account preferences plist.
///
/// Missing or unreadable preferences yield an empty list — the caller
/// reports "no teams" with setup guidance.
pub fn discover_signing_teams() -> Vec<SigningTeam> {
    discover_signing_teams_at(&paths::xcode_prefs())
}

pub fn discover_signing_teams_at(plist_path: &Path) -> Vec<SigningTeam> {
    if !plist_path.exists() {
        tracing::warn!(path = %plist_path.display(), "Xcode preferences not found");
        return Vec::new();
    }

    let prefs = match plist::Value::from_file(plist_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(err = %e, "failed to read Xcode preferences");
            return Vec::new();
        }
    };

    let Some(teams_by_account) = prefs
        .as_dictionary()
        .and_then(|d| d.get("IDEProvisioningTeamByIdentifier"))
        .and_then(plist::Value::as_dictionary)
    else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut teams = Vec::new();
    for account_teams in teams_by_account.values() {
        let Some(entries) = account_teams.as_array() else { continue };
        for entry in entries {
            let Some(dict) = entry.as_dictionary() else { continue };
            let team_id = dict
                .get("teamID")
                .and_then(plist::Value::as_string)
                .unwrap_or_default()
                .to_owned();
            if team_id.is_empty() || !seen.insert(team_id.clone()) {
                continue;
            }
            teams.push(SigningTeam {
                team_id,
                team_name: dict
                    .get("teamName")
                    .and_then(plist::Value::as_string)
                    .unwrap_or_default()
                    .to_owned(),
                team_type: dict
                    .get("teamType")
                    .and_then(plist::Value::as_string)
                    .unwrap_or_default()
                    .to_owned(),
            });
        }
    }

    teams
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
