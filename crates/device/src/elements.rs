// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UI element model: wire records, parsing with predicate pushdown, search
//! helpers, and hierarchy queries.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Element bounds in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Frame {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x <= x && x <= self.x + self.width && self.y <= y && y <= self.y + self.height
    }
}

fn default_true() -> bool {
    true
}

/// Flat accessibility record in the device-native shape.
///
/// Field names mirror what the device emits (`AXLabel`, `AXUniqueId`, ...)
/// so these records round-trip through JSON unchanged. Unknown keys are
/// dropped, expected-but-missing keys default — WDA versions drift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxElement {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "AXUniqueId", default)]
    pub identifier: Option<String>,
    #[serde(rename = "AXLabel", default)]
    pub label: String,
    #[serde(rename = "AXValue", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub frame: Option<Frame>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub role_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_actions: Vec<String>,
}

/// Nested form of [`AxElement`]: every node carries a `children` sequence.
///
/// A parent's frame need not contain its children's frames — iOS emits
/// out-of-tree accessibility elements. Consumers must not assume geometric
/// containment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxNode {
    #[serde(flatten)]
    pub element: AxElement,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AxNode>,
}

/// Canonical UI element, produced per query. Elements have no identity
/// across snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,
    pub enabled: bool,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub role_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_actions: Vec<String>,
}

/// Search criteria applied during parsing (predicate pushdown).
#[derive(Debug, Clone, Default)]
pub struct ElementFilter {
    /// Exact label, case-insensitive.
    pub label: Option<String>,
    /// Exact identifier, case-sensitive.
    pub identifier: Option<String>,
    /// Exact type, case-insensitive.
    pub kind: Option<String>,
}

impl ElementFilter {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.identifier.is_none() && self.kind.is_none()
    }
}

fn stringify_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map raw device records to [`Element`]s, applying `filter` before
/// construction.
///
/// Large screens produce thousands of records; when the caller wants one
/// element, the raw-field checks skip everything else without building it.
pub fn parse_elements(raw: &[AxElement], filter: &ElementFilter) -> Vec<Element> {
    let label_lower = filter.label.as_ref().map(|l| l.to_lowercase());
    let kind_lower = filter.kind.as_ref().map(|t| t.to_lowercase());

    let mut out = Vec::new();
    for item in raw {
        if let Some(ref want) = filter.identifier {
            if item.identifier.as_deref() != Some(want.as_str()) {
                continue;
            }
        }
        if let Some(ref want) = label_lower {
            if item.label.to_lowercase() != *want {
                continue;
            }
        }
        if let Some(ref want) = kind_lower {
            if item.kind.to_lowercase() != *want {
                continue;
            }
        }

        let kind = if item.kind.is_empty() { "Unknown".to_owned() } else { item.kind.clone() };
        out.push(Element {
            kind,
            label: item.label.clone(),
            identifier: item.identifier.clone().filter(|s| !s.is_empty()),
            value: item.value.as_ref().map(stringify_value),
            frame: item.frame,
            enabled: item.enabled,
            role: item.role.clone(),
            role_description: item.role_description.clone(),
            help: item.help.clone(),
            custom_actions: item.custom_actions.clone(),
        });
    }
    out
}

/// Elements whose label equals `label`, case-insensitively.
///
/// Never substring: "Mail" must not match "Voicemail".
pub fn find_by_label<'a>(elements: &'a [Element], label: &str) -> Vec<&'a Element> {
    let lower = label.to_lowercase();
    elements.iter().filter(|e| e.label.to_lowercase() == lower).collect()
}

/// Elements whose identifier equals `identifier` (case-sensitive).
pub fn find_by_identifier<'a>(elements: &'a [Element], identifier: &str) -> Vec<&'a Element> {
    elements.iter().filter(|e| e.identifier.as_deref() == Some(identifier)).collect()
}

/// Elements whose type equals `kind`, case-insensitively.
pub fn find_by_type<'a>(elements: &'a [Element], kind: &str) -> Vec<&'a Element> {
    let lower = kind.to_lowercase();
    elements.iter().filter(|e| e.kind.to_lowercase() == lower).collect()
}

/// Combined search: label or identifier is the primary criterion (at least
/// one required), type narrows when provided.
pub fn find_element<'a>(
    elements: &'a [Element],
    label: Option<&str>,
    identifier: Option<&str>,
    kind: Option<&str>,
) -> Vec<&'a Element> {
    let mut matches = match (label, identifier) {
        (Some(l), _) if !l.is_empty() => find_by_label(elements, l),
        (_, Some(i)) if !i.is_empty() => find_by_identifier(elements, i),
        _ => return Vec::new(),
    };

    if let Some(kind) = kind.filter(|k| !k.is_empty()) {
        let lower = kind.to_lowercase();
        matches.retain(|e| e.kind.to_lowercase() == lower);
    }

    matches
}

/// Tap center of an element's frame, rounded to 2 decimals.
///
/// Frame-less elements have no center; operations that need one fail here.
pub fn center(element: &Element) -> Result<(f64, f64), DeviceError> {
    let frame = element.frame.ok_or_else(|| {
        let name = if element.label.is_empty() { &element.kind } else { &element.label };
        DeviceError::Validation(format!("element '{name}' has no frame"))
    })?;
    let x = frame.x + frame.width / 2.0;
    let y = frame.y + frame.height / 2.0;
    Ok(((x * 100.0).round() / 100.0, (y * 100.0).round() / 100.0))
}

fn find_node<'a>(
    nodes: &'a [AxNode],
    identifier: Option<&str>,
    label_lower: Option<&str>,
) -> Option<&'a AxNode> {
    for node in nodes {
        if let Some(want) = identifier {
            if node.element.identifier.as_deref() == Some(want) {
                return Some(node);
            }
        }
        if let Some(want) = label_lower {
            if node.element.label.to_lowercase() == want {
                return Some(node);
            }
        }
        if let Some(found) = find_node(&node.children, identifier, label_lower) {
            return Some(found);
        }
    }
    None
}

fn flatten_nodes(nodes: &[AxNode], out: &mut Vec<AxElement>) {
    for node in nodes {
        out.push(node.element.clone());
        flatten_nodes(&node.children, out);
    }
}

/// Flatten a nested tree, parents before children.
pub fn flatten_tree(nodes: &[AxNode]) -> Vec<AxElement> {
    let mut out = Vec::new();
    flatten_nodes(nodes, &mut out);
    out
}

/// All descendants of the first node matching `identifier` (checked first
/// at every level) or `label` (case-insensitive), flattened without the
/// `children` key. The input tree is not mutated. Unknown parent → empty.
pub fn find_children_of(
    tree: &[AxNode],
    identifier: Option<&str>,
    label: Option<&str>,
) -> Vec<AxElement> {
    let label_lower = label.map(str::to_lowercase);
    let Some(parent) = find_node(tree, identifier, label_lower.as_deref()) else {
        return Vec::new();
    };
    flatten_tree(&parent.children)
}

/// The deepest element whose frame contains `(x, y)`.
///
/// Flat lists put parents before children, so the last match is the most
/// specific element — callers rely on this ordering.
pub fn find_element_at_point(elements: &[AxElement], x: f64, y: f64) -> Option<&AxElement> {
    let mut best = None;
    for el in elements {
        if let Some(frame) = el.frame {
            if frame.contains(x, y) {
                best = Some(el);
            }
        }
    }
    best
}

#[cfg(test)]
#[path = "elements_tests.rs"]
mod tests;
