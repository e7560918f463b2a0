// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::discover_signing_teams_at;

fn write_prefs(dir: &std::path::Path, teams: &[(&str, &str, &str)]) -> std::path::PathBuf {
    let mut entries = plist::Value::Array(
        teams
            .iter()
            .map(|(id, name, kind)| {
                let mut d = plist::Dictionary::new();
                d.insert("teamID".into(), plist::Value::String((*id).to_owned()));
                d.insert("teamName".into(), plist::Value::String((*name).to_owned()));
                d.insert("teamType".into(), plist::Value::String((*kind).to_owned()));
                plist::Value::Dictionary(d)
            })
            .collect(),
    );
    // Duplicate the account to exercise the cross-account dedupe.
    let mut by_account = plist::Dictionary::new();
    by_account.insert("apple-id-1".into(), entries.clone());
    if let plist::Value::Array(ref mut v) = entries {
        v.truncate(1);
    }
    by_account.insert("apple-id-2".into(), entries);

    let mut root = plist::Dictionary::new();
    root.insert("IDEProvisioningTeamByIdentifier".into(), plist::Value::Dictionary(by_account));

    let path = dir.join("com.apple.dt.Xcode.plist");
    plist::Value::Dictionary(root).to_file_xml(&path).expect("write plist");
    path
}

#[test]
fn missing_prefs_yields_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(discover_signing_teams_at(&dir.path().join("nope.plist")).is_empty());
}

#[test]
fn corrupt_prefs_yields_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("com.apple.dt.Xcode.plist");
    std::fs::write(&path, "not a plist").expect("write");
    assert!(discover_signing_teams_at(&path).is_empty());
}

#[test]
fn single_team_is_discovered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_prefs(dir.path(), &[("TEAM123", "Acme Inc.", "Company")]);

    let teams = discover_signing_teams_at(&path);
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].team_id, "TEAM123");
    assert_eq!(teams[0].team_name, "Acme Inc.");
}

#[test]
fn teams_are_deduped_across_accounts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_prefs(
        dir.path(),
        &[("TEAM1", "Acme", "Company"), ("TEAM2", "Personal", "Personal Team")],
    );

    let teams = discover_signing_teams_at(&path);
    // TEAM1 appears under both accounts but is listed once.
    assert_eq!(teams.len(), 2);
    let ids: Vec<&str> = teams.iter().map(|t| t.team_id.as_str()).collect();
    assert!(ids.contains(&"TEAM1"));
    assert!(ids.contains(&"TEAM2"));
}

#[test]
fn blank_team_ids_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_prefs(dir.path(), &[("", "Ghost", "Company"), ("TEAM9", "Real", "Company")]);

    let teams = discover_signing_teams_at(&path);
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].team_id, "TEAM9");
}
