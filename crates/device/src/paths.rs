// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem layout under the quern config directory.

use std::path::PathBuf;

use crate::short_udid;

/// Root config directory: `$QUERN_HOME`, or `~/.quern`.
///
/// The env override exists so tests (and parallel server instances) can run
/// against an isolated directory.
pub fn config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("QUERN_HOME") {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".quern")
}

/// `<config>/wda` — everything WDA-related lives under here.
pub fn wda_dir() -> PathBuf {
    config_dir().join("wda")
}

/// Upstream WebDriverAgent source clone.
pub fn wda_repo_dir() -> PathBuf {
    wda_dir().join("WebDriverAgent")
}

/// xcodebuild derived-data path for the WDA build.
pub fn derived_data_dir() -> PathBuf {
    wda_dir().join("build")
}

/// Directory containing build products (the xctestrun file and Runner app).
pub fn products_dir() -> PathBuf {
    derived_data_dir().join("Build").join("Products")
}

/// Stable-named xctestrun file. Upstream writes a version-specific name;
/// `lifecycle::rename_xctestrun` moves it here once per build so lookups
/// are deterministic.
pub fn xctestrun_stable() -> PathBuf {
    products_dir().join("quern-driver.xctestrun")
}

/// The installable runner bundle produced by build-for-testing.
pub fn runner_app() -> PathBuf {
    products_dir().join("Debug-iphoneos").join("WebDriverAgentRunner-Runner.app")
}

/// The test bundle embedded in the runner app. Its code signature is the
/// authoritative source for the effective signing identity.
pub fn runner_xctest() -> PathBuf {
    runner_app().join("PlugIns").join("WebDriverAgentRunner.xctest")
}

/// Lock-protected JSON state file.
pub fn state_file() -> PathBuf {
    config_dir().join("wda-state.json")
}

/// Per-device driver log (xcodebuild stdout+stderr).
pub fn runner_log(udid: &str) -> PathBuf {
    wda_dir().join(format!("runner-{}.log", short_udid(udid)))
}

/// Xcode account preferences plist (signing team discovery).
pub fn xcode_prefs() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home)
        .join("Library")
        .join("Preferences")
        .join("com.apple.dt.Xcode.plist")
}
