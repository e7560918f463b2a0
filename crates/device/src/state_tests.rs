// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use chrono::Utc;

use super::{read_state_at, save_state_at, InstallRecord, RunnerRecord, WdaState};

fn sample_state() -> WdaState {
    let mut installs = HashMap::new();
    installs.insert("00008030-AABBCCDD".to_owned(), InstallRecord { installed_at: Utc::now() });
    let mut runners = HashMap::new();
    runners.insert(
        "00008030-AABBCCDD".to_owned(),
        RunnerRecord { pid: 4242, started_at: Utc::now(), os_version: "iOS 17.4".to_owned() },
    );
    WdaState {
        cloned: true,
        build_team_id: Some("TEAM123".to_owned()),
        built_at: Some(Utc::now()),
        installs,
        runners,
    }
}

#[test]
fn missing_file_reads_as_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = read_state_at(&dir.path().join("wda-state.json"));
    assert_eq!(state, WdaState::default());
    assert!(!state.cloned);
}

#[test]
fn empty_file_reads_as_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wda-state.json");
    std::fs::write(&path, "   \n").expect("write");
    assert_eq!(read_state_at(&path), WdaState::default());
}

#[test]
fn corrupt_json_reads_as_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wda-state.json");
    std::fs::write(&path, "{not valid json!!").expect("write");
    assert_eq!(read_state_at(&path), WdaState::default());
}

#[test]
fn roundtrip_preserves_all_fields() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wda-state.json");
    let state = sample_state();
    save_state_at(&path, &state).expect("save");

    let loaded = read_state_at(&path);
    assert_eq!(loaded, state);
    assert_eq!(loaded.runners["00008030-AABBCCDD"].pid, 4242);
}

#[test]
fn save_creates_parent_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("deeper").join("wda-state.json");
    save_state_at(&path, &WdaState::default()).expect("save");
    assert!(path.exists());
}

#[test]
fn unknown_keys_are_tolerated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wda-state.json");
    std::fs::write(
        &path,
        r#"{"cloned": true, "build_team_id": "T1", "future_field": {"x": 1}}"#,
    )
    .expect("write");

    let state = read_state_at(&path);
    assert!(state.cloned);
    assert_eq!(state.build_team_id.as_deref(), Some("T1"));
}

// Two writers racing under the exclusive lock must leave valid JSON with
// one writer's installs map intact.
#[test]
fn concurrent_writes_leave_valid_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wda-state.json");

    let mk = |udid: &str| {
        let mut installs = HashMap::new();
        installs.insert(udid.to_owned(), InstallRecord { installed_at: Utc::now() });
        WdaState { cloned: true, installs, ..WdaState::default() }
    };
    let state_a = mk("DEVICE-A");
    let state_b = mk("DEVICE-B");

    let handles: Vec<_> = [state_a, state_b]
        .into_iter()
        .map(|state| {
            let path = path.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    save_state_at(&path, &state).expect("save");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread");
    }

    let contents = std::fs::read_to_string(&path).expect("read");
    let state: WdaState = serde_json::from_str(&contents).expect("file must be valid JSON");
    assert!(state.cloned);
    assert_eq!(state.installs.len(), 1);
    let udid = state.installs.keys().next().expect("one install");
    assert!(udid == "DEVICE-A" || udid == "DEVICE-B");
}
