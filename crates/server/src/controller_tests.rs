// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use quern_device::discovery::{DeviceInfo, DeviceKind};
use quern_device::elements::Element;

use super::{evaluate_condition, Controller};

fn sim(udid: &str, name: &str, booted: bool) -> DeviceInfo {
    DeviceInfo {
        udid: udid.to_owned(),
        name: name.to_owned(),
        kind: DeviceKind::Simulator,
        os_version: Some("iOS 17.2".to_owned()),
        booted,
        available: true,
    }
}

fn phone(udid: &str, name: &str) -> DeviceInfo {
    DeviceInfo {
        udid: udid.to_owned(),
        name: name.to_owned(),
        kind: DeviceKind::Physical,
        os_version: Some("iOS 17.4".to_owned()),
        booted: true,
        available: true,
    }
}

fn element(value: Option<&str>, enabled: bool) -> Element {
    Element {
        kind: "TextField".to_owned(),
        label: "Search".to_owned(),
        identifier: None,
        value: value.map(str::to_owned),
        frame: None,
        enabled,
        role: String::new(),
        role_description: String::new(),
        help: None,
        custom_actions: Vec::new(),
    }
}

#[tokio::test]
async fn resolve_explicit_udid_must_exist() {
    let controller = Controller::with_devices(vec![sim("SIM-1", "iPhone 15", true)]);

    assert_eq!(controller.resolve_udid(Some("SIM-1")).await.expect("resolve"), "SIM-1");
    let err = controller.resolve_udid(Some("GHOST")).await.expect_err("unknown");
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn resolve_without_udid_prefers_active_then_booted() {
    let controller = Controller::with_devices(vec![
        sim("SIM-OFF", "iPhone 15", false),
        sim("SIM-ON", "iPhone 15 Pro", true),
    ]);

    // No active yet: first booted wins and becomes active.
    assert_eq!(controller.resolve_udid(None).await.expect("resolve"), "SIM-ON");
    assert_eq!(controller.active_udid().as_deref(), Some("SIM-ON"));

    // Explicit resolution does not displace the active device.
    controller.resolve_udid(Some("SIM-OFF")).await.expect("resolve");
    assert_eq!(controller.resolve_udid(None).await.expect("resolve"), "SIM-ON");
}

#[tokio::test]
async fn resolve_without_any_booted_device_fails() {
    let controller = Controller::with_devices(vec![sim("SIM-OFF", "iPhone 15", false)]);
    let err = controller.resolve_udid(None).await.expect_err("nothing booted");
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn ui_operations_reject_simulators() {
    let controller = Controller::with_devices(vec![sim("SIM-1", "iPhone 15", true)]);
    let err = controller.tap(10.0, 10.0, Some("SIM-1")).await.expect_err("simulator");
    assert_eq!(err.kind(), "VALIDATION");
    assert!(err.to_string().contains("simulator"));
}

#[tokio::test]
async fn wda_lifecycle_requires_physical_device() {
    let controller = Controller::with_devices(vec![
        sim("SIM-1", "iPhone 15", true),
        phone("PHONE-1", "Test iPhone"),
    ]);

    let err = controller.setup_wda("SIM-1", None).await.expect_err("simulator");
    assert_eq!(err.kind(), "VALIDATION");

    let err = controller.setup_wda("GHOST", None).await.expect_err("unknown");
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn get_element_requires_search_criteria() {
    let controller = Controller::with_devices(vec![phone("PHONE-1", "Test iPhone")]);
    let err = controller.get_element(None, None, None, Some("PHONE-1")).await.expect_err("empty");
    assert_eq!(err.kind(), "VALIDATION");
}

#[tokio::test]
async fn unknown_strategy_is_rejected() {
    let controller = Controller::with_devices(vec![phone("PHONE-1", "Test iPhone")]);
    let err = controller
        .get_ui_elements(Some("PHONE-1"), None, Some("warp"))
        .await
        .expect_err("bad strategy");
    assert_eq!(err.kind(), "VALIDATION");
}

#[tokio::test]
async fn ensure_boots_nothing_when_enough_are_booted() {
    let controller = Controller::with_devices(vec![
        sim("SIM-1", "iPhone 15", true),
        sim("SIM-2", "iPhone 15 Pro", true),
    ]);

    let udids = controller.ensure_devices(2, Some("iphone")).await.expect("ensure");
    assert_eq!(udids.len(), 2);
    assert_eq!(controller.active_udid().as_deref(), Some(udids[0].as_str()));
}

#[tokio::test]
async fn ensure_fails_when_pool_cannot_satisfy_count() {
    let controller = Controller::with_devices(vec![
        sim("SIM-1", "iPhone 15", true),
        phone("PHONE-1", "Real iPhone"),
    ]);

    // Physical devices are never auto-booted, and there are no shutdown
    // simulators to boot.
    let err = controller.ensure_devices(3, None).await.expect_err("cannot satisfy");
    assert_eq!(err.kind(), "NOT_FOUND");
}

// -- Wait conditions ----------------------------------------------------------

#[test]
fn exists_and_not_exists() {
    let el = element(None, true);
    assert!(evaluate_condition("exists", Some(&el), &None).expect("ok"));
    assert!(!evaluate_condition("exists", None, &None).expect("ok"));
    assert!(evaluate_condition("not_exists", None, &None).expect("ok"));
    assert!(!evaluate_condition("not_exists", Some(&el), &None).expect("ok"));
}

#[test]
fn enabled_and_disabled() {
    let on = element(None, true);
    let off = element(None, false);
    assert!(evaluate_condition("enabled", Some(&on), &None).expect("ok"));
    assert!(!evaluate_condition("enabled", Some(&off), &None).expect("ok"));
    assert!(evaluate_condition("disabled", Some(&off), &None).expect("ok"));
    assert!(!evaluate_condition("disabled", None, &None).expect("ok"));
}

#[test]
fn value_conditions_compare_strings() {
    let el = element(Some("pizza margherita"), true);
    assert!(evaluate_condition("value_equals", Some(&el), &Some("pizza margherita".into()))
        .expect("ok"));
    assert!(!evaluate_condition("value_equals", Some(&el), &Some("pizza".into())).expect("ok"));
    assert!(evaluate_condition("value_contains", Some(&el), &Some("pizza".into())).expect("ok"));
    assert!(
        !evaluate_condition("value_contains", Some(&el), &Some("sushi".into())).expect("ok")
    );
}

#[test]
fn unknown_condition_is_a_validation_error() {
    let err = evaluate_condition("levitates", None, &None).expect_err("unknown");
    assert_eq!(err.kind(), "VALIDATION");
}
