// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed. UI flows that reach
//! the device run against a `wiremock` fake WDA.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quern_device::discovery::{DeviceInfo, DeviceKind};
use quern_server::controller::Controller;
use quern_server::routes::build_router;
use quern_server::state::AppState;

const API_KEY: &str = "test-key-0123456789abcdef";
const PHONE: &str = "00008130-PHONE";
const SESSION_ID: &str = "AAAA1111-2222-3333-4444-555566667777";

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

fn phone(udid: &str) -> DeviceInfo {
    DeviceInfo {
        udid: udid.to_owned(),
        name: "Test iPhone".to_owned(),
        kind: DeviceKind::Physical,
        os_version: Some("iOS 17.4".to_owned()),
        booted: true,
        available: true,
    }
}

fn test_state(devices: Vec<DeviceInfo>) -> Arc<AppState> {
    Arc::new(AppState::new(
        API_KEY.to_owned(),
        Controller::with_devices(devices),
        CancellationToken::new(),
    ))
}

fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(build_router(state)).expect("failed to create test server")
}

fn api_key_header() -> (HeaderName, HeaderValue) {
    (HeaderName::from_static("x-api-key"), HeaderValue::from_static(API_KEY))
}

fn bearer_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {API_KEY}")).expect("header"),
    )
}

// -- Auth ---------------------------------------------------------------------

#[tokio::test]
async fn health_is_unauthenticated() {
    let server = test_server(test_state(vec![]));
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn missing_key_is_401_with_detail() {
    let server = test_server(test_state(vec![]));
    let resp = server.get("/api/v1/devices").await;
    resp.assert_status_unauthorized();
    let body: serde_json::Value = resp.json();
    assert!(body["detail"].as_str().expect("detail").contains("API key"));
}

#[tokio::test]
async fn wrong_key_is_401() {
    let server = test_server(test_state(vec![]));
    let resp = server
        .get("/api/v1/devices")
        .add_header(HeaderName::from_static("x-api-key"), HeaderValue::from_static("wrong"))
        .await;
    resp.assert_status_unauthorized();
}

#[tokio::test]
async fn both_auth_header_styles_work() {
    let server = test_server(test_state(vec![sim("SIM-1", "iPhone 15", true)]));

    let (name, value) = api_key_header();
    server.get("/api/v1/devices").add_header(name, value).await.assert_status_ok();

    let (name, value) = bearer_header();
    server.get("/api/v1/devices").add_header(name, value).await.assert_status_ok();
}

#[tokio::test]
async fn unknown_route_is_401_without_key() {
    // Auth runs before routing: probing for routes without a key reveals
    // nothing.
    let server = test_server(test_state(vec![]));
    let resp = server.get("/api/v1/does-not-exist").await;
    resp.assert_status_unauthorized();
}

// -- Devices & pool -----------------------------------------------------------

#[tokio::test]
async fn device_listing_includes_active_udid() {
    let server = test_server(test_state(vec![
        sim("SIM-1", "iPhone 15", true),
        phone(PHONE),
    ]));

    let (name, value) = api_key_header();
    let resp = server.get("/api/v1/devices").add_header(name, value).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["total"], 2);
    assert_eq!(body["active_udid"], serde_json::Value::Null);
}

#[tokio::test]
async fn resolve_sets_active_and_reports_miss() {
    let server = test_server(test_state(vec![sim("SIM-1", "iPhone 15", true)]));

    let (name, value) = api_key_header();
    let resp = server
        .post("/api/v1/devices/resolve")
        .add_header(name.clone(), value.clone())
        .json(&json!({"name_contains": "iphone", "booted": true}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["udid"], "SIM-1");

    let resp = server
        .post("/api/v1/devices/resolve")
        .add_header(name, value)
        .json(&json!({"name": "Pixel"}))
        .await;
    resp.assert_status_not_found();
    let body: serde_json::Value = resp.json();
    assert!(body["detail"].as_str().expect("detail").contains("no device matches"));
}

#[tokio::test]
async fn claim_release_cycle() {
    let server = test_server(test_state(vec![sim("SIM-1", "iPhone 15", true)]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/devices/claim")
        .add_header(name.clone(), value.clone())
        .json(&json!({"udid": "SIM-1", "session_id": "run-42"}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["claim"]["session_id"], "run-42");

    // Second session cannot claim the same device.
    let resp = server
        .post("/api/v1/devices/claim")
        .add_header(name.clone(), value.clone())
        .json(&json!({"udid": "SIM-1", "session_id": "run-43"}))
        .await;
    resp.assert_status_bad_request();

    let resp = server
        .post("/api/v1/devices/release")
        .add_header(name.clone(), value.clone())
        .json(&json!({"udid": "SIM-1", "session_id": "run-42"}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["released"], true);

    // Now the other session can claim it.
    let resp = server
        .post("/api/v1/devices/claim")
        .add_header(name, value)
        .json(&json!({"udid": "SIM-1", "session_id": "run-43"}))
        .await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn ensure_with_satisfied_count_returns_udids() {
    let server = test_server(test_state(vec![
        sim("SIM-1", "iPhone 15", true),
        sim("SIM-2", "iPhone 15 Pro", true),
    ]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/devices/ensure")
        .add_header(name, value)
        .json(&json!({"count": 2, "name_contains": "iphone"}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["count"], 2);
}

// -- WDA lifecycle validation -------------------------------------------------

#[tokio::test]
async fn wda_start_rejects_simulators() {
    let server = test_server(test_state(vec![sim("SIM-1", "iPhone 15", true)]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/wda/start")
        .add_header(name, value)
        .json(&json!({"udid": "SIM-1"}))
        .await;
    resp.assert_status_bad_request();
    let body: serde_json::Value = resp.json();
    assert!(body["detail"].as_str().expect("detail").to_lowercase().contains("simulator"));
}

#[tokio::test]
async fn wda_start_unknown_device_is_404() {
    let server = test_server(test_state(vec![]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/wda/start")
        .add_header(name, value)
        .json(&json!({"udid": "nonexistent"}))
        .await;
    resp.assert_status_not_found();
}

#[tokio::test]
async fn wda_stop_rejects_simulators() {
    let server = test_server(test_state(vec![sim("SIM-1", "iPhone 15", true)]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/wda/stop")
        .add_header(name, value)
        .json(&json!({"udid": "SIM-1"}))
        .await;
    resp.assert_status_bad_request();
}

// -- UI validation ------------------------------------------------------------

#[tokio::test]
async fn wait_for_element_rejects_long_timeouts() {
    let server = test_server(test_state(vec![phone(PHONE)]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/wait-for-element")
        .add_header(name, value)
        .json(&json!({"condition": "exists", "label": "Done", "timeout": 61.0, "udid": PHONE}))
        .await;
    resp.assert_status_bad_request();
    let body: serde_json::Value = resp.json();
    assert!(body["detail"].as_str().expect("detail").contains("60"));
}

#[tokio::test]
async fn wait_for_element_value_condition_requires_value() {
    let server = test_server(test_state(vec![phone(PHONE)]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/wait-for-element")
        .add_header(name, value)
        .json(&json!({"condition": "value_equals", "label": "Search", "udid": PHONE}))
        .await;
    resp.assert_status_bad_request();
}

#[tokio::test]
async fn ui_snapshot_depth_is_range_checked() {
    let server = test_server(test_state(vec![phone(PHONE)]));
    let (name, value) = api_key_header();

    let resp = server
        .get("/api/v1/device/ui?snapshot_depth=99")
        .add_header(name, value)
        .await;
    resp.assert_status_bad_request();
}

#[tokio::test]
async fn ui_on_simulator_is_rejected() {
    let server = test_server(test_state(vec![sim("SIM-1", "iPhone 15", true)]));
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/tap")
        .add_header(name, value)
        .json(&json!({"x": 10.0, "y": 10.0, "udid": "SIM-1"}))
        .await;
    resp.assert_status_bad_request();
}

// -- UI flows against a fake WDA ----------------------------------------------

async fn mock_wda(server: &MockServer, source: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": {"ready": true}})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"sessionId": SESSION_ID, "value": {}})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/session/{SESSION_ID}/appium/settings")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": source})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/session/{SESSION_ID}/wda/tap")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
        .mount(server)
        .await;
}

fn button(label: &str, identifier: Option<&str>, x: f64) -> serde_json::Value {
    let mut el = json!({
        "type": "XCUIElementTypeButton",
        "label": label,
        "rect": {"x": x, "y": 100.0, "width": 80.0, "height": 44.0},
        "isEnabled": "1"
    });
    if let Some(id) = identifier {
        el["rawIdentifier"] = json!(id);
    }
    el
}

fn demo_screen() -> serde_json::Value {
    json!({
        "type": "XCUIElementTypeApplication",
        "label": "Demo",
        "rect": {"x": 0, "y": 0, "width": 393.0, "height": 852.0},
        "children": [
            button("Mail", Some("mailButton"), 10.0),
            button("Voicemail", None, 110.0),
            button("Duplicate", None, 210.0),
            button("Duplicate", None, 310.0),
            {
                "type": "XCUIElementTypeTabBar",
                "label": "Tab Bar",
                "rect": {"x": 0.0, "y": 800.0, "width": 393.0, "height": 52.0}
            }
        ]
    })
}

async fn ui_fixture() -> (TestServer, MockServer) {
    let wda = MockServer::start().await;
    mock_wda(&wda, demo_screen()).await;

    let state = test_state(vec![phone(PHONE)]);
    state.controller.client().register_endpoint(PHONE, &wda.uri()).await;
    (test_server(state), wda)
}

#[tokio::test]
async fn ui_returns_parsed_elements() {
    let (server, _wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .get(&format!("/api/v1/device/ui?udid={PHONE}"))
        .add_header(name, value)
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["element_count"], 6);
    assert_eq!(body["udid"], PHONE);
    assert_eq!(body["elements"][0]["type"], "Application");
}

#[tokio::test]
async fn element_lookup_matches_exactly() {
    let (server, _wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    // "Mail" must not match "Voicemail".
    let resp = server
        .get(&format!("/api/v1/device/ui/element?label=Mail&udid={PHONE}"))
        .add_header(name.clone(), value.clone())
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["element"]["label"], "Mail");
    assert_eq!(body["element"]["identifier"], "mailButton");
    assert!(body.get("match_count").is_none());

    let resp = server
        .get(&format!("/api/v1/device/ui/element?label=Gone&udid={PHONE}"))
        .add_header(name, value)
        .await;
    resp.assert_status_not_found();
}

#[tokio::test]
async fn ambiguous_element_lookup_reports_match_count() {
    let (server, _wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .get(&format!("/api/v1/device/ui/element?label=Duplicate&udid={PHONE}"))
        .add_header(name, value)
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["match_count"], 2);
}

#[tokio::test]
async fn tap_element_taps_the_center_of_single_match() {
    let (server, wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/tap-element")
        .add_header(name, value)
        .json(&json!({"label": "Mail", "udid": PHONE}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["x"], 50.0);
    assert_eq!(body["y"], 122.0);

    let taps = wda
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with("/wda/tap"))
        .count();
    assert_eq!(taps, 1);
}

#[tokio::test]
async fn tap_element_with_multiple_matches_is_ambiguous() {
    let (server, wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/tap-element")
        .add_header(name, value)
        .json(&json!({"label": "Duplicate", "udid": PHONE}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ambiguous");
    assert_eq!(body["match_count"], 2);

    let taps = wda
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with("/wda/tap"))
        .count();
    assert_eq!(taps, 0, "ambiguity must not tap anything");
}

#[tokio::test]
async fn tap_element_without_match_is_404() {
    let (server, _wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/tap-element")
        .add_header(name, value)
        .json(&json!({"label": "Gone", "udid": PHONE}))
        .await;
    resp.assert_status_not_found();
}

#[tokio::test]
async fn screen_summary_reports_counts_and_chrome() {
    let (server, _wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .get(&format!("/api/v1/device/screen-summary?max_elements=2&udid={PHONE}"))
        .add_header(name, value)
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();

    assert_eq!(body["element_count"], 6);
    assert_eq!(body["total_interactive_elements"], 4);
    assert_eq!(body["truncated"], true);
    // 2 retained interactives + the tab bar appended unconditionally.
    assert_eq!(body["interactive_elements"].as_array().expect("list").len(), 3);
    assert!(body["summary"].as_str().expect("summary").starts_with("Demo screen"));
    assert_eq!(body["udid"], PHONE);
}

#[tokio::test]
async fn wait_for_element_matches_immediately() {
    let (server, _wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/wait-for-element")
        .add_header(name, value)
        .json(&json!({"condition": "exists", "label": "Mail", "timeout": 5.0, "udid": PHONE}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["matched"], true);
    assert_eq!(body["polls"], 1);
    assert_eq!(body["element"]["label"], "Mail");
}

#[tokio::test]
async fn wait_for_element_timeout_is_a_200() {
    let (server, _wda) = ui_fixture().await;
    let (name, value) = api_key_header();

    let resp = server
        .post("/api/v1/device/ui/wait-for-element")
        .add_header(name, value)
        .json(&json!({
            "condition": "exists", "label": "Never", "timeout": 0.3,
            "interval": 0.1, "udid": PHONE
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["matched"], false);
    assert!(body["polls"].as_u64().expect("polls") >= 2);
}
