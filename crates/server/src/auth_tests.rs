// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

use super::{constant_time_eq, validate_api_key};

fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        map.insert(
            axum::http::HeaderName::from_bytes(k.as_bytes()).expect("header name"),
            v.parse().expect("header value"),
        );
    }
    map
}

#[test]
fn bearer_token_is_accepted() {
    let h = headers(&[("authorization", "Bearer sekrit")]);
    assert!(validate_api_key(&h, "sekrit"));
}

#[test]
fn x_api_key_is_accepted() {
    let h = headers(&[("x-api-key", "sekrit")]);
    assert!(validate_api_key(&h, "sekrit"));
}

#[test]
fn wrong_key_is_rejected() {
    let h = headers(&[("authorization", "Bearer nope")]);
    assert!(!validate_api_key(&h, "sekrit"));
    let h = headers(&[("x-api-key", "nope")]);
    assert!(!validate_api_key(&h, "sekrit"));
}

#[test]
fn missing_headers_are_rejected() {
    assert!(!validate_api_key(&HeaderMap::new(), "sekrit"));
}

#[test]
fn bearer_prefix_is_required() {
    let h = headers(&[("authorization", "sekrit")]);
    assert!(!validate_api_key(&h, "sekrit"));
}

#[test]
fn constant_time_eq_handles_lengths() {
    assert!(constant_time_eq("abc", "abc"));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "abcd"));
    assert!(constant_time_eq("", ""));
}
