// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Skeleton fallback: a lightweight screen description from targeted
//! element queries, for screens where `/source` is too slow.
//!
//! Class-chain queries use XCTest's lazy query API and bypass the snapshot
//! mechanism entirely, which keeps them safe on screens with hundreds of
//! map annotations.

use std::collections::HashSet;

use futures_util::future::join_all;

use crate::elements::AxElement;
use crate::short_udid;

use super::wire::QueryHit;
use super::WdaClient;

/// Containers worth finding on any screen. Most screens lack an alert or
/// sheet — a missing container is normal, not a failure.
const CONTAINER_CHAINS: &[&str] = &[
    "**/XCUIElementTypeTabBar",
    "**/XCUIElementTypeNavigationBar",
    "**/XCUIElementTypeToolbar",
    "**/XCUIElementTypeAlert",
    "**/XCUIElementTypeSheet",
];

/// Child types queried per container. `class name` returns direct children
/// only and is reliable across WDA versions.
const CHILD_TYPES: &[&str] = &["XCUIElementTypeButton", "XCUIElementTypeOther"];

impl WdaClient {
    /// Build a flat screen description via two parallel query phases:
    /// containers by class chain, then each container's direct Button and
    /// Other children by class name.
    ///
    /// Output is containers first, then children deduped by the device's
    /// element reference. The references themselves never leave this
    /// function. Best-effort by contract — per-query failures degrade to
    /// empty results.
    pub async fn build_screen_skeleton(
        &self,
        udid: &str,
    ) -> Result<Vec<AxElement>, crate::DeviceError> {
        let start = std::time::Instant::now();

        // Phase 1: containers in parallel.
        let container_results = join_all(CONTAINER_CHAINS.iter().map(|chain| {
            self.find_elements_by_query(udid, "class chain", chain, None, None)
        }))
        .await;
        let containers: Vec<QueryHit> = container_results
            .into_iter()
            .flatten()
            .filter(|hit| hit.ref_id.is_some())
            .collect();

        // Phase 2: direct children of every container, in parallel.
        let child_queries: Vec<_> = containers
            .iter()
            .filter_map(|c| c.ref_id.as_deref())
            .flat_map(|ref_id| {
                CHILD_TYPES.iter().map(move |child_type| {
                    self.find_elements_by_query(
                        udid,
                        "class name",
                        child_type,
                        Some(ref_id),
                        None,
                    )
                })
            })
            .collect();
        let child_results = join_all(child_queries).await;

        // Children can overlap across the type queries; dedupe by element
        // reference.
        let mut seen: HashSet<String> = HashSet::new();
        let mut children: Vec<AxElement> = Vec::new();
        for hit in child_results.into_iter().flatten() {
            if let Some(ref ref_id) = hit.ref_id {
                if !seen.insert(ref_id.clone()) {
                    continue;
                }
            }
            children.push(hit.element);
        }

        let container_count = containers.len();
        let mut flat: Vec<AxElement> =
            containers.into_iter().map(|hit| hit.element).collect();
        flat.extend(children);

        tracing::info!(
            udid = %short_udid(udid),
            elements = flat.len(),
            containers = container_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built screen skeleton"
        );
        Ok(flat)
    }
}
