// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{parse_devicectl_list, parse_simctl_list, DeviceKind};

#[test]
fn simctl_devices_carry_runtime_os_version() {
    let json = r#"{
        "devices": {
            "com.apple.CoreSimulator.SimRuntime.iOS-17-2": [
                {"udid": "SIM-1", "name": "iPhone 15", "state": "Booted", "isAvailable": true},
                {"udid": "SIM-2", "name": "iPhone 15 Pro", "state": "Shutdown", "isAvailable": true}
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
                {"udid": "SIM-3", "name": "iPhone 14", "state": "Shutdown", "isAvailable": false}
            ]
        }
    }"#;

    let mut devices = parse_simctl_list(json).expect("parse");
    devices.sort_by(|a, b| a.udid.cmp(&b.udid));

    assert_eq!(devices.len(), 3);
    assert_eq!(devices[0].kind, DeviceKind::Simulator);
    assert_eq!(devices[0].os_version.as_deref(), Some("iOS 17.2"));
    assert!(devices[0].booted);
    assert!(!devices[1].booted);
    assert_eq!(devices[2].os_version.as_deref(), Some("iOS 16.4"));
    assert!(!devices[2].available);
}

#[test]
fn simctl_empty_listing_is_ok() {
    let devices = parse_simctl_list(r#"{"devices": {}}"#).expect("parse");
    assert!(devices.is_empty());
}

#[test]
fn simctl_garbage_is_an_error() {
    assert!(parse_simctl_list("nope").is_err());
}

#[test]
fn devicectl_devices_are_physical() {
    let json = r#"{
        "result": {
            "devices": [
                {
                    "identifier": "53DA57AA-1111-2222-3333-444455556666",
                    "deviceProperties": {"name": "quern's iPhone", "osVersionNumber": "17.4.1"},
                    "hardwareProperties": {"udid": "00008130-AAAA"},
                    "connectionProperties": {"tunnelState": "connected"}
                },
                {
                    "identifier": "7B0B0000-0000-0000-0000-000000000000",
                    "deviceProperties": {"name": "Old iPhone", "osVersionNumber": "15.8"},
                    "connectionProperties": {"tunnelState": "unavailable"}
                }
            ]
        }
    }"#;

    let devices = parse_devicectl_list(json).expect("parse");
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].kind, DeviceKind::Physical);
    assert_eq!(devices[0].os_version.as_deref(), Some("iOS 17.4.1"));
    assert!(devices[0].booted);
    assert!(!devices[1].booted, "unavailable tunnel state means disconnected");
}

#[test]
fn devicectl_unknown_fields_are_tolerated() {
    let json = r#"{
        "result": {
            "devices": [
                {"identifier": "X-1", "novelField": 42, "deviceProperties": {"name": "n"}}
            ]
        },
        "info": {"jsonVersion": 2}
    }"#;
    let devices = parse_devicectl_list(json).expect("parse");
    assert_eq!(devices.len(), 1);
    assert!(devices[0].os_version.is_none());
}
