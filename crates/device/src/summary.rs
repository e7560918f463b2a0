// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template-based screen summarizer with priority-aware truncation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::elements::Element;

/// Element types considered interactive for screen summaries.
const INTERACTIVE_TYPES: &[&str] =
    &["button", "textfield", "switch", "slider", "link", "searchfield"];

/// Structured screen description for downstream agent consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenSummary {
    pub summary: String,
    pub element_count: usize,
    pub element_types: BTreeMap<String, usize>,
    pub interactive_elements: Vec<SummaryEntry>,
    pub truncated: bool,
    pub total_interactive_elements: usize,
    pub max_elements: usize,
}

/// One interactive or navigation entry in a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl SummaryEntry {
    fn from_element(el: &Element) -> Self {
        Self {
            kind: el.kind.clone(),
            label: el.label.clone(),
            identifier: el.identifier.clone(),
            // Devices report empty-string values for blank fields; a blank
            // is not a value.
            value: el.value.clone().filter(|v| !v.is_empty()),
        }
    }
}

/// Tab bars, nav bars, toolbars, back buttons. Always surfaced, never
/// counted against the truncation budget.
fn is_navigation_chrome(el: &Element) -> bool {
    let kind = el.kind.to_lowercase();
    if matches!(kind.as_str(), "tabbar" | "navigationbar" | "toolbar" | "navbar") {
        return true;
    }
    if kind == "button" && el.label.to_lowercase().contains("back") {
        return true;
    }
    kind.contains("tab")
}

/// Truncation priority. Higher survives longer:
/// 60 buttons-with-identifier, 40 form inputs, 20 bare buttons, 5 rest.
fn priority(el: &Element) -> u32 {
    let kind = el.kind.to_lowercase();
    if kind == "button" && el.identifier.is_some() {
        return 60;
    }
    if matches!(kind.as_str(), "textfield" | "switch" | "slider" | "searchfield" | "picker") {
        return 40;
    }
    if kind == "button" {
        return 20;
    }
    5
}

/// Summarize a screen's elements.
///
/// `max_elements == 0` disables truncation. Navigation chrome is appended
/// after truncation, unconditionally.
pub fn generate_screen_summary(elements: &[Element], max_elements: usize) -> ScreenSummary {
    let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut interactive: Vec<(SummaryEntry, u32)> = Vec::new();
    let mut chrome: Vec<SummaryEntry> = Vec::new();

    for el in elements {
        *type_counts.entry(el.kind.clone()).or_default() += 1;

        if is_navigation_chrome(el) {
            chrome.push(SummaryEntry::from_element(el));
            continue;
        }
        if INTERACTIVE_TYPES.contains(&el.kind.to_lowercase().as_str()) {
            interactive.push((SummaryEntry::from_element(el), priority(el)));
        }
    }

    let total_interactive = interactive.len();
    let mut truncated = false;
    if max_elements > 0 && interactive.len() > max_elements {
        interactive.sort_by_key(|(_, p)| std::cmp::Reverse(*p));
        interactive.truncate(max_elements);
        truncated = true;
    }

    let mut entries: Vec<SummaryEntry> = interactive.into_iter().map(|(e, _)| e).collect();
    entries.extend(chrome);

    let summary = compose_prose(elements, &type_counts, &entries);

    ScreenSummary {
        summary,
        element_count: elements.len(),
        element_types: type_counts,
        interactive_elements: entries,
        truncated,
        total_interactive_elements: total_interactive,
        max_elements,
    }
}

fn compose_prose(
    elements: &[Element],
    type_counts: &BTreeMap<String, usize>,
    entries: &[SummaryEntry],
) -> String {
    let mut parts: Vec<String> = Vec::new();

    // App context from the Application element, when it has a label.
    let app_label = elements
        .iter()
        .find(|e| e.kind == "Application")
        .map(|e| e.label.trim())
        .filter(|l| !l.is_empty());
    let mut head = match app_label {
        Some(app) => format!("{app} screen"),
        None => "Screen".to_owned(),
    };

    // Ties in the count ordering resolve by first appearance on screen,
    // not alphabetically — only four descriptions survive, so the
    // tie-break decides which type names make the prose.
    let mut first_seen: Vec<&str> = Vec::new();
    for el in elements {
        if !first_seen.contains(&el.kind.as_str()) {
            first_seen.push(el.kind.as_str());
        }
    }
    let rank = |kind: &str| first_seen.iter().position(|k| *k == kind).unwrap_or(usize::MAX);

    let mut counts: Vec<(&String, &usize)> =
        type_counts.iter().filter(|(t, _)| t.as_str() != "Application").collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| rank(a.0).cmp(&rank(b.0))));
    let descriptions: Vec<String> = counts
        .iter()
        .map(|(t, count)| {
            let plural = if **count > 1 { "s" } else { "" };
            format!("{} {}{}", count, t.to_lowercase(), plural)
        })
        .collect();
    if !descriptions.is_empty() {
        head.push_str(&format!(" with {}", descriptions[..descriptions.len().min(4)].join(", ")));
        if descriptions.len() > 4 {
            head.push_str(&format!(", and {} more type(s)", descriptions.len() - 4));
        }
    }
    head.push('.');
    parts.push(head);

    let labeled: Vec<&str> =
        entries.iter().filter(|e| !e.label.is_empty()).map(|e| e.label.as_str()).collect();
    if !labeled.is_empty() {
        let mut line =
            format!("Interactive elements: {}", labeled[..labeled.len().min(15)].join(", "));
        if labeled.len() > 15 {
            line.push_str(&format!(", and {} more", labeled.len() - 15));
        }
        line.push('.');
        parts.push(line);
    }

    let valued: Vec<String> = entries
        .iter()
        .filter_map(|e| {
            e.value.as_ref().map(|v| {
                let name = if e.label.is_empty() { &e.kind } else { &e.label };
                format!("{name}: '{v}'")
            })
        })
        .collect();
    if !valued.is_empty() {
        parts.push(format!("Values: {}.", valued[..valued.len().min(5)].join(", ")));
    }

    parts.join(" ")
}

#[cfg(test)]
#[path = "summary_tests.rs"]
mod tests;
