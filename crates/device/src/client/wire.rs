// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WDA payload decoding: `/source` trees and element-query responses.
//!
//! Everything here is permissive by design — WDA versions drift, so unknown
//! keys are ignored and missing keys default.

use serde::Deserialize;

use crate::elements::{AxElement, AxNode, Frame};

const TYPE_PREFIX: &str = "XCUIElementType";

// W3C WebDriver element reference key, verbatim.
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// One node of the `/source?format=json` tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceNode {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "rawIdentifier")]
    pub raw_identifier: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub rect: Option<RawRect>,
    #[serde(default, rename = "isEnabled", deserialize_with = "de_flexible_bool")]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub children: Vec<SourceNode>,
}

/// Element record from `POST /session/:id/elements` (compact responses
/// disabled, so attributes arrive inline).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryElement {
    #[serde(default, rename = "ELEMENT")]
    pub element: Option<String>,
    #[serde(default, rename = "element-6066-11e4-a52e-4f735466cecf")]
    pub w3c_element: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "rawIdentifier")]
    pub raw_identifier: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub rect: Option<RawRect>,
    #[serde(default, rename = "isEnabled", deserialize_with = "de_flexible_bool")]
    pub is_enabled: Option<bool>,
}

/// Rect with every field optional: a frame exists only when all four are
/// present.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawRect {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl RawRect {
    fn to_frame(self) -> Option<Frame> {
        Some(Frame { x: self.x?, y: self.y?, width: self.width?, height: self.height? })
    }
}

/// WDA emits booleans as `true`, `1`, or `"1"` depending on version.
fn de_flexible_bool<'de, D>(de: D) -> Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Bool(b) => Some(b),
        serde_json::Value::Number(n) => Some(n.as_i64() != Some(0)),
        serde_json::Value::String(s) => Some(s != "0" && !s.is_empty()),
        _ => None,
    }))
}

/// Strip WDA's class prefix: "XCUIElementTypeButton" → "Button".
pub fn strip_type_prefix(kind: &str) -> &str {
    kind.strip_prefix(TYPE_PREFIX).unwrap_or(kind)
}

/// Accessibility identifier, with class-name echoes filtered: devices
/// report the class name as the element name when no identifier is set,
/// and that echo must not masquerade as an identifier.
fn pick_identifier(primary: Option<&str>, secondary: Option<&str>) -> Option<String> {
    for candidate in [primary, secondary].into_iter().flatten() {
        if !candidate.is_empty() && !candidate.starts_with(TYPE_PREFIX) {
            return Some(candidate.to_owned());
        }
    }
    None
}

fn map_source_element(node: &SourceNode) -> AxElement {
    AxElement {
        kind: strip_type_prefix(&node.kind).to_owned(),
        identifier: pick_identifier(node.raw_identifier.as_deref(), node.name.as_deref()),
        label: node.label.clone().unwrap_or_default(),
        value: node.value.clone().filter(|v| !v.is_null()),
        frame: node.rect.and_then(RawRect::to_frame),
        enabled: node.is_enabled.unwrap_or(true),
        role: String::new(),
        role_description: String::new(),
        help: None,
        custom_actions: Vec::new(),
    }
}

/// Flatten a source tree, parents before children — `describe_point`
/// depends on that order to pick the deepest hit.
pub fn flatten_source_tree(node: &SourceNode) -> Vec<AxElement> {
    let mut out = Vec::new();
    flatten_into(node, &mut out);
    out
}

fn flatten_into(node: &SourceNode, out: &mut Vec<AxElement>) {
    out.push(map_source_element(node));
    for child in &node.children {
        flatten_into(child, out);
    }
}

/// Convert a source tree keeping the hierarchy.
pub fn convert_source_tree(node: &SourceNode) -> AxNode {
    AxNode {
        element: map_source_element(node),
        children: node.children.iter().map(convert_source_tree).collect(),
    }
}

/// A query result: the mapped element plus the device-assigned element
/// reference, used for scoped child queries and dedup. The reference is
/// internal and never serialized to callers.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub element: AxElement,
    pub ref_id: Option<String>,
}

/// Map one `/elements` entry. `locator_value` supplies the element type
/// when the response omits it (class-chain values like
/// `**/XCUIElementTypeTabBar` reduce to their last path segment).
pub fn map_query_element(raw: &QueryElement, locator_value: &str) -> QueryHit {
    let kind_source = match raw.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(k) => k,
        None => locator_value.rsplit('/').next().unwrap_or(locator_value),
    };

    let element = AxElement {
        kind: strip_type_prefix(kind_source).to_owned(),
        identifier: pick_identifier(raw.name.as_deref(), raw.raw_identifier.as_deref()),
        label: raw.label.clone().unwrap_or_default(),
        value: raw.value.clone().filter(|v| !v.is_null()),
        frame: raw.rect.and_then(RawRect::to_frame),
        enabled: raw.is_enabled.unwrap_or(true),
        role: String::new(),
        role_description: String::new(),
        help: None,
        custom_actions: Vec::new(),
    };

    QueryHit { element, ref_id: raw.element.clone().or_else(|| raw.w3c_element.clone()) }
}

/// Extract an element reference from a `POST /element` response value.
pub fn element_ref(value: &serde_json::Value) -> Option<String> {
    value
        .get("ELEMENT")
        .or_else(|| value.get(W3C_ELEMENT_KEY))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
