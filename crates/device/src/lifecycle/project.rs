// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clone, customize, build, and install the WDA runner.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;

use crate::error::DeviceError;
use crate::proc::run_tool;
use crate::state::{self, InstallRecord};
use crate::{paths, short_udid};

const WDA_REPO_URL: &str = "https://github.com/appium/WebDriverAgent.git";
const CLONE_TIMEOUT: Duration = Duration::from_secs(60);
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
const SIGN_TIMEOUT: Duration = Duration::from_secs(60);

/// Vendored runner app icon, injected over upstream's assets.
const ICON_BYTES: &[u8] = include_bytes!("../../resources/wda-icon.png");

/// Marker that shows up in the project file once customization ran.
const CUSTOMIZE_MARKER: &str = "PRODUCT_NAME = QuernDriver";

// Build-settings blocks of the WebDriverAgentRunner target in upstream's
// project.pbxproj, Debug and Release.
const DEBUG_CONFIG_UUID: &str = "EEF988321C486604005CA669";
const RELEASE_CONFIG_UUID: &str = "EEF988331C486604005CA669";

/// Clone the WDA sources if not already present.
///
/// Returns `true` if a fresh clone was performed.
pub async fn clone_sources() -> Result<bool, DeviceError> {
    let repo = paths::wda_repo_dir();
    if repo.join(".git").exists() {
        tracing::info!(path = %repo.display(), "WDA repo already cloned");
        return Ok(false);
    }

    std::fs::create_dir_all(paths::wda_dir())
        .map_err(|e| DeviceError::Unknown(format!("cannot create wda dir: {e}")))?;

    tracing::info!(path = %repo.display(), "cloning WebDriverAgent");
    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", WDA_REPO_URL]).arg(&repo);
    let out = run_tool("git", cmd, CLONE_TIMEOUT).await?;
    if !out.success() {
        return Err(DeviceError::CloneFailed(format!(
            "git clone failed (rc={:?}): {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(true)
}

/// Inject the quern icon and product name into the WDA project.
///
/// Replaces upstream's `AppIcon-1024.png` assets in place (adding a new
/// asset catalog conflicts with the one in WebDriverAgentLib) and patches
/// `PRODUCT_NAME` into both build configurations. Idempotent — returns
/// `false` when the marker is already present.
pub fn customize_project(repo: &Path) -> Result<bool, DeviceError> {
    let mut replaced = 0usize;
    for appiconset in find_appiconsets(repo) {
        let icon_dest = appiconset.join("AppIcon-1024.png");
        if icon_dest.exists() {
            std::fs::write(&icon_dest, ICON_BYTES)
                .map_err(|e| DeviceError::Unknown(format!("icon replace failed: {e}")))?;
            replaced += 1;
        }
    }
    if replaced == 0 {
        tracing::warn!("no upstream AppIcon-1024.png found to replace");
    }

    let pbxproj = repo.join("WebDriverAgent.xcodeproj").join("project.pbxproj");
    if !pbxproj.exists() {
        return Err(DeviceError::NotFound(format!(
            "project.pbxproj not found at {}",
            pbxproj.display()
        )));
    }

    let content = std::fs::read_to_string(&pbxproj)
        .map_err(|e| DeviceError::Unknown(format!("cannot read project file: {e}")))?;
    if content.contains(CUSTOMIZE_MARKER) {
        tracing::info!("WDA project already customized");
        return Ok(false);
    }

    let mut patched = content;
    for config_uuid in [DEBUG_CONFIG_UUID, RELEASE_CONFIG_UUID] {
        let pattern = regex::Regex::new(&format!(
            r"(?s)({config_uuid}\s*/\*[^*]*\*/\s*=\s*\{{[^}}]*?buildSettings\s*=\s*\{{)\s*\n"
        ))
        .map_err(|e| DeviceError::Unknown(format!("bad config pattern: {e}")))?;
        patched = pattern
            .replace(&patched, format!("${{1}}\n\t\t\t\t{CUSTOMIZE_MARKER};\n"))
            .into_owned();
    }

    std::fs::write(&pbxproj, patched)
        .map_err(|e| DeviceError::Unknown(format!("cannot write project file: {e}")))?;
    tracing::info!("customized WDA project: replaced icons and set product name");
    Ok(true)
}

fn find_appiconsets(root: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n == "AppIcon.appiconset") {
                    found.push(path);
                } else {
                    stack.push(path);
                }
            }
        }
    }
    found
}

/// Build WDA for a signing team.
///
/// `generic/platform=iOS` makes the artifact valid for any arm64 device,
/// so builds are cached by team only. Returns `true` when a fresh build
/// was performed.
pub async fn build(team_id: &str) -> Result<bool, DeviceError> {
    let current = state::read_state().await;
    if current.build_team_id.as_deref() == Some(team_id) {
        tracing::info!(team = %team_id, "WDA already built for this team");
        return Ok(false);
    }

    let repo = paths::wda_repo_dir();
    if !repo.exists() {
        return Err(DeviceError::BuildFailed("WDA repo not cloned — run setup first".to_owned()));
    }

    tracing::info!(team = %team_id, "building WDA");
    let mut cmd = Command::new("xcodebuild");
    cmd.arg("build-for-testing")
        .arg("-project")
        .arg(repo.join("WebDriverAgent.xcodeproj"))
        .args(["-scheme", "WebDriverAgentRunner"])
        .args(["-destination", "generic/platform=iOS"])
        .arg(format!("DEVELOPMENT_TEAM={team_id}"))
        .arg("CODE_SIGNING_ALLOWED=YES")
        .arg("-allowProvisioningUpdates")
        .arg("-derivedDataPath")
        .arg(paths::derived_data_dir());

    let out = run_tool("xcodebuild", cmd, BUILD_TIMEOUT).await?;
    if !out.success() {
        let combined = format!("{}{}", out.stderr, out.stdout);
        if combined.contains("No Account for Team") {
            return Err(DeviceError::BuildFailed(format!(
                "Xcode has no account logged in for team '{team_id}'. Open Xcode → Settings → \
                 Accounts and sign in with the Apple ID associated with this team, then retry."
            )));
        }
        if combined.contains("No signing certificate") {
            return Err(DeviceError::BuildFailed(format!(
                "No signing certificate found for team '{team_id}'. Open Xcode → Settings → \
                 Accounts → select the team → Manage Certificates → add an 'Apple Development' \
                 certificate."
            )));
        }
        return Err(DeviceError::BuildFailed(format!(
            "xcodebuild failed (rc={:?}):\nstderr: {}\nstdout (tail): {}",
            out.code,
            out.stderr.trim(),
            out.stdout_tail(20)
        )));
    }

    post_process_runner_app().await;
    super::driver::rename_xctestrun()?;

    let team = team_id.to_owned();
    state::update_state(move |s| {
        s.cloned = true;
        s.build_team_id = Some(team);
        s.built_at = Some(Utc::now());
    })
    .await?;

    Ok(true)
}

/// Patch the generated Runner app with the quern icon and display name.
///
/// build-for-testing wraps the .xctest bundle in a Runner app that gets
/// Xcode defaults — the customized settings only land in the inner bundle.
/// Copy the assets out, patch Info.plist, and re-sign. Failures here are
/// logged, not fatal: the runner still works, it just looks like upstream.
async fn post_process_runner_app() {
    let runner_app = paths::runner_app();
    let xctest = paths::runner_xctest();

    if !runner_app.exists() {
        tracing::warn!(path = %runner_app.display(), "runner app not found, skipping post-process");
        return;
    }

    if let Ok(entries) = std::fs::read_dir(&xctest) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if (name_str.starts_with("AppIcon") && name_str.ends_with(".png"))
                || name_str == "Assets.car"
            {
                if let Err(e) = std::fs::copy(entry.path(), runner_app.join(&name)) {
                    tracing::debug!(file = %name_str, err = %e, "asset copy failed");
                }
            }
        }
    }

    patch_runner_info_plist(&runner_app);

    let Some(identity) = find_signing_identity(&xctest).await else {
        tracing::warn!("no signing identity found in xctest bundle, skipping re-sign");
        return;
    };

    // Inner bundle first, then the outer app.
    for bundle in [&xctest, &runner_app] {
        let mut cmd = Command::new("codesign");
        cmd.args(["--force", "--sign", &identity])
            .arg("--preserve-metadata=identifier,entitlements")
            .arg(bundle);
        match run_tool("codesign", cmd, SIGN_TIMEOUT).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                tracing::warn!(bundle = %bundle.display(), stderr = %out.stderr.trim(), "re-sign failed");
                return;
            }
            Err(e) => {
                tracing::warn!(bundle = %bundle.display(), err = %e, "re-sign failed");
                return;
            }
        }
    }
    tracing::info!("post-processed runner app: display name, icon, and signature updated");
}

fn patch_runner_info_plist(runner_app: &Path) {
    let info_plist = runner_app.join("Info.plist");
    if !info_plist.exists() {
        return;
    }

    let Ok(plist::Value::Dictionary(mut dict)) = plist::Value::from_file(&info_plist) else {
        tracing::debug!("runner Info.plist unreadable, skipping patch");
        return;
    };

    dict.insert("CFBundleDisplayName".into(), plist::Value::String("QuernDriver".to_owned()));

    let mut icon_names: Vec<String> = std::fs::read_dir(runner_app)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.starts_with("AppIcon") && n.ends_with(".png"))
                .collect()
        })
        .unwrap_or_default();
    icon_names.sort();
    if !icon_names.is_empty() {
        let files = plist::Value::Array(
            icon_names
                .iter()
                .map(|n| {
                    plist::Value::String(
                        n.trim_end_matches(".png").trim_end_matches("~ipad").to_owned(),
                    )
                })
                .collect(),
        );
        let mut primary = plist::Dictionary::new();
        primary.insert("CFBundleIconFiles".into(), files);
        primary.insert("UIPrerenderedIcon".into(), plist::Value::Boolean(false));
        let mut icons = plist::Dictionary::new();
        icons.insert("CFBundlePrimaryIcon".into(), plist::Value::Dictionary(primary));
        dict.insert("CFBundleIcons".into(), plist::Value::Dictionary(icons));
    }

    if let Err(e) = plist::Value::Dictionary(dict).to_file_binary(&info_plist) {
        tracing::debug!(err = %e, "runner Info.plist write failed");
    }
}

/// Extract the signing authority from the xctest bundle's existing code
/// signature. xcodebuild already selected the effective identity during the
/// build, so this beats guessing from the keychain.
pub async fn find_signing_identity(xctest: &Path) -> Option<String> {
    if !xctest.exists() {
        return None;
    }

    let mut cmd = Command::new("codesign");
    cmd.args(["-d", "--verbose=2"]).arg(xctest);
    let out = run_tool("codesign", cmd, SIGN_TIMEOUT).await.ok()?;
    // codesign -d writes its report to stderr.
    parse_signing_authority(&out.stderr)
}

pub(crate) fn parse_signing_authority(codesign_output: &str) -> Option<String> {
    codesign_output
        .lines()
        .find(|line| line.starts_with("Authority=Apple Development:"))
        .and_then(|line| line.split_once('='))
        .map(|(_, authority)| authority.to_owned())
}

pub(crate) fn parse_ios_major_version(os_version: &str) -> Result<u32, DeviceError> {
    regex::Regex::new(r"(\d+)")
        .ok()
        .and_then(|re| re.find(os_version))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| {
            DeviceError::Validation(format!("cannot parse iOS version from {os_version:?}"))
        })
}

/// Install the runner onto a device, routed by major iOS version:
/// 17+ via devicectl, older via the USB-mux installer.
pub async fn install(udid: &str, os_version: &str) -> Result<(), DeviceError> {
    let app = paths::runner_app();
    if !app.exists() {
        return Err(DeviceError::NotFound(format!(
            "WDA app not found at {} — build first",
            app.display()
        )));
    }

    let major = parse_ios_major_version(os_version)?;
    let (tool, out) = if major >= 17 {
        tracing::info!(udid = %short_udid(udid), "installing WDA via devicectl");
        let mut cmd = Command::new("xcrun");
        cmd.args(["devicectl", "device", "install", "app", "--device", udid]).arg(&app);
        ("devicectl", run_tool("devicectl", cmd, INSTALL_TIMEOUT).await?)
    } else {
        tracing::info!(udid = %short_udid(udid), "installing WDA via ideviceinstaller");
        let mut cmd = Command::new("ideviceinstaller");
        cmd.args(["-u", udid, "-i"]).arg(&app);
        ("ideviceinstaller", run_tool("ideviceinstaller", cmd, INSTALL_TIMEOUT).await?)
    };

    if !out.success() {
        return Err(DeviceError::InstallFailed {
            tool: tool.to_owned(),
            detail: format!("install failed (rc={:?}): {}", out.code, out.stderr.trim()),
        });
    }

    let owner = udid.to_owned();
    state::update_state(move |s| {
        s.installs.insert(owner, InstallRecord { installed_at: Utc::now() });
    })
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
