// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::{
    customize_project, parse_ios_major_version, parse_signing_authority, CUSTOMIZE_MARKER,
};

// Minimal pbxproj excerpt carrying the two build-settings blocks the
// customization patches.
const PBXPROJ_SNIPPET: &str = r#"// !$*UTF8*$!
{
	objects = {
		EEF988321C486604005CA669 /* Debug */ = {
			isa = XCBuildConfiguration;
			buildSettings = {
				CODE_SIGN_IDENTITY = "iPhone Developer";
			};
			name = Debug;
		};
		EEF988331C486604005CA669 /* Release */ = {
			isa = XCBuildConfiguration;
			buildSettings = {
				CODE_SIGN_IDENTITY = "iPhone Developer";
			};
			name = Release;
		};
	};
}
"#;

fn setup_repo(dir: &std::path::Path) -> std::path::PathBuf {
    let repo = dir.join("WebDriverAgent");
    let proj = repo.join("WebDriverAgent.xcodeproj");
    std::fs::create_dir_all(&proj).expect("mkdir");
    std::fs::write(proj.join("project.pbxproj"), PBXPROJ_SNIPPET).expect("write pbxproj");

    let iconset = repo.join("WebDriverAgentLib").join("Assets.xcassets").join("AppIcon.appiconset");
    std::fs::create_dir_all(&iconset).expect("mkdir iconset");
    std::fs::write(iconset.join("AppIcon-1024.png"), b"upstream-bytes").expect("write icon");
    repo
}

#[test]
fn customize_replaces_upstream_icons() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = setup_repo(dir.path());

    assert!(customize_project(&repo).expect("customize"));

    let icon = repo
        .join("WebDriverAgentLib")
        .join("Assets.xcassets")
        .join("AppIcon.appiconset")
        .join("AppIcon-1024.png");
    let bytes = std::fs::read(icon).expect("read icon");
    assert_ne!(bytes.as_slice(), b"upstream-bytes");
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[test]
fn customize_patches_both_build_configurations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = setup_repo(dir.path());

    customize_project(&repo).expect("customize");

    let content = std::fs::read_to_string(
        repo.join("WebDriverAgent.xcodeproj").join("project.pbxproj"),
    )
    .expect("read");
    assert_eq!(content.matches(CUSTOMIZE_MARKER).count(), 2);
}

#[test]
fn customize_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = setup_repo(dir.path());

    assert!(customize_project(&repo).expect("first run"));
    assert!(!customize_project(&repo).expect("second run"), "marker short-circuits");

    let content = std::fs::read_to_string(
        repo.join("WebDriverAgent.xcodeproj").join("project.pbxproj"),
    )
    .expect("read");
    assert_eq!(content.matches(CUSTOMIZE_MARKER).count(), 2, "no duplicate settings");
}

#[test]
fn customize_fails_without_project_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = customize_project(dir.path()).expect_err("no pbxproj");
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[parameterized(
    ios_17 = {"iOS 17.2", 17},
    ios_15_patch = {"iOS 15.8.6", 15},
    ios_26 = {"iOS 26.0", 26},
    bare_number = {"16.4", 16},
)]
fn ios_major_version_is_parsed(input: &str, expected: u32) {
    assert_eq!(parse_ios_major_version(input).expect("parse"), expected);
}

#[test]
fn unparseable_ios_version_is_rejected() {
    let err = parse_ios_major_version("who knows").expect_err("must fail");
    assert_eq!(err.kind(), "VALIDATION");
}

#[test]
fn signing_authority_is_extracted_from_codesign_report() {
    let report = "\
Executable=/x/WebDriverAgentRunner.xctest/WebDriverAgentRunner
Identifier=com.facebook.WebDriverAgentRunner
Authority=Apple Development: Jane Doe (ABC123DEF4)
Authority=Apple Worldwide Developer Relations Certification Authority
Signed Time=1 Aug 2026 at 10:00:00
";
    assert_eq!(
        parse_signing_authority(report).as_deref(),
        Some("Apple Development: Jane Doe (ABC123DEF4)")
    );
}

#[test]
fn missing_authority_yields_none() {
    assert!(parse_signing_authority("Identifier=x\nSigned Time=now").is_none());
}
