// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WDA client: per-device connection cache, session lifecycle, request
//! dispatch, idle reaping, and hang recovery.
//!
//! Connection strategy per device:
//! - tunneled devices (iOS 17+): direct IPv6 tunnel address on port 8100
//! - older devices: a spawned USB-mux `forward LOCAL → device:8100`
//!   subprocess, connected via localhost

pub mod skeleton;
pub mod wire;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::elements::{AxElement, AxNode};
use crate::error::DeviceError;
use crate::{lifecycle, proc, short_udid, tunnel};

use wire::{QueryHit, SourceNode};

pub(crate) const WDA_PORT: u16 = 8100;
const WDA_TIMEOUT: Duration = Duration::from_secs(10);
/// Most screens return `/source` in under 2 s; anything slower is treated
/// as a hang and handled by the skeleton fallback.
const SOURCE_TIMEOUT: Duration = Duration::from_secs(3);
/// WDA's default of 50 hangs the snapshot walk on map-heavy screens.
const SNAPSHOT_MAX_DEPTH: u32 = 10;
const ELEMENT_RESPONSE_ATTRIBUTES: &str = "type,label,name,rect,enabled,value";
const FORWARD_START_PORT: u16 = 18100;
const FORWARD_BIND_GRACE: Duration = Duration::from_millis(500);
const FORWARD_STOP_GRACE: Duration = Duration::from_secs(3);
const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DISCOVERY_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub(crate) const SKELETON_QUERY_TIMEOUT: Duration = Duration::from_secs(8);

/// One WDA request as seen by the dispatch primitive.
struct WdaRequest<'a> {
    method: Method,
    path: &'a str,
    use_session: bool,
    timeout: Duration,
    raise_on_timeout: bool,
    body: Option<serde_json::Value>,
    query: &'a [(&'a str, &'a str)],
}

impl<'a> WdaRequest<'a> {
    fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            use_session: false,
            timeout: WDA_TIMEOUT,
            raise_on_timeout: false,
            body: None,
            query: &[],
        }
    }

    fn session_post(path: &'a str, body: serde_json::Value) -> Self {
        Self { use_session: true, body: Some(body), ..Self::new(Method::POST, path) }
    }
}

/// Cached connection info for a device.
struct WdaConnection {
    base_url: String,
    session_id: Option<String>,
    forward: Option<ForwardProc>,
    last_interaction: Instant,
    /// Mirrors the snapshotMaxDepth last pushed to the device, so
    /// redundant settings POSTs are skipped.
    snapshot_depth: Option<u32>,
}

struct ForwardProc {
    child: tokio::process::Child,
    local_port: u16,
}

struct Inner {
    http: reqwest::Client,
    connections: RwLock<HashMap<String, WdaConnection>>,
    /// Per-device session-creation locks. The fast path never touches
    /// these; they only serialize the create itself.
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Known OS versions, fed by the controller after discovery. Needed
    /// for driver auto-start.
    os_versions: std::sync::RwLock<HashMap<String, String>>,
    next_forward_port: AtomicU16,
    reaper_started: AtomicBool,
    shutdown: CancellationToken,
}

/// Speaks WDA's HTTP API for UI automation on physical iOS devices.
///
/// Cheap to clone; all clones share the connection cache.
#[derive(Clone)]
pub struct WdaClient {
    inner: Arc<Inner>,
}

impl Default for WdaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WdaClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                http: reqwest::Client::new(),
                connections: RwLock::new(HashMap::new()),
                session_locks: Mutex::new(HashMap::new()),
                os_versions: std::sync::RwLock::new(HashMap::new()),
                next_forward_port: AtomicU16::new(FORWARD_START_PORT),
                reaper_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Record a device's OS version for driver auto-start.
    pub fn set_os_version(&self, udid: &str, os_version: &str) {
        if let Ok(mut map) = self.inner.os_versions.write() {
            map.insert(udid.to_owned(), os_version.to_owned());
        }
    }

    fn os_version(&self, udid: &str) -> Option<String> {
        self.inner.os_versions.read().ok()?.get(udid).cloned()
    }

    /// Pre-seed a device endpoint, skipping tunnel/forward discovery.
    /// Useful for WDA instances reachable over the network (and for tests).
    pub async fn register_endpoint(&self, udid: &str, base_url: &str) {
        let mut conns = self.inner.connections.write().await;
        conns.insert(
            udid.to_owned(),
            WdaConnection {
                base_url: base_url.trim_end_matches('/').to_owned(),
                session_id: None,
                forward: None,
                last_interaction: Instant::now(),
                snapshot_depth: None,
            },
        );
    }

    // ------------------------------------------------------------------
    // Connection management
    // ------------------------------------------------------------------

    async fn probe_status(&self, base_url: &str, timeout: Duration) -> bool {
        matches!(
            self.inner.http.get(format!("{base_url}/status")).timeout(timeout).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    /// Get (or establish) the WDA base URL for a device.
    ///
    /// Cached connections are revalidated: forward-backed ones by checking
    /// the subprocess, tunnel-backed ones by a `/status` probe. If WDA is
    /// unreachable and the OS version is known, the driver is auto-started
    /// and both discovery paths are retried once.
    async fn base_url(&self, udid: &str) -> Result<String, DeviceError> {
        enum Cached {
            ForwardAlive(String),
            NeedsProbe(String),
            None,
        }

        // Revalidate a cached connection.
        let cached = {
            let mut conns = self.inner.connections.write().await;
            match conns.get_mut(udid) {
                Some(conn) if conn.forward.is_some() => {
                    let alive = conn
                        .forward
                        .as_mut()
                        .is_some_and(|f| matches!(f.child.try_wait(), Ok(None)));
                    if alive {
                        Cached::ForwardAlive(conn.base_url.clone())
                    } else {
                        conns.remove(udid);
                        Cached::None
                    }
                }
                Some(conn) => Cached::NeedsProbe(conn.base_url.clone()),
                None => Cached::None,
            }
        };
        match cached {
            Cached::ForwardAlive(url) => return Ok(url),
            Cached::NeedsProbe(url) => {
                if self.probe_status(&url, STATUS_PROBE_TIMEOUT).await {
                    return Ok(url);
                }
                tracing::info!(udid = %short_udid(udid), "cached WDA tunnel stale, reconnecting");
                self.invalidate(udid).await;
            }
            Cached::None => {}
        }

        if let Some(url) = self.connect(udid).await? {
            return Ok(url);
        }

        // WDA unreachable on both paths — auto-start if we can.
        let Some(os_version) = self.os_version(udid) else {
            return Err(DeviceError::Transport(format!(
                "WDA not reachable on {} and os_version unknown — cannot auto-start. \
                 Ensure WDA is running on the device.",
                short_udid(udid)
            )));
        };

        tracing::info!(udid = %short_udid(udid), "WDA not reachable, auto-starting driver");
        let result = lifecycle::start_driver(udid, &os_version).await?;
        if result.ready != Some(true) && result.status == lifecycle::DriverState::Started {
            return Err(DeviceError::Unavailable(format!(
                "Auto-started WDA driver on {} but it did not become responsive. Check log: {}",
                short_udid(udid),
                crate::paths::runner_log(udid).display()
            )));
        }

        match self.connect(udid).await? {
            Some(url) => Ok(url),
            None => Err(DeviceError::Unavailable(format!(
                "WDA still not reachable on {} after driver start",
                short_udid(udid)
            ))),
        }
    }

    /// One pass over both discovery paths: tunnel first, then USB-mux
    /// forward.
    async fn connect(&self, udid: &str) -> Result<Option<String>, DeviceError> {
        if let Some(base_url) = self.try_tunnel(udid).await {
            self.register_endpoint(udid, &base_url).await;
            return Ok(Some(base_url));
        }

        match self.start_forward(udid).await {
            Ok((base_url, child, local_port)) => {
                let mut conns = self.inner.connections.write().await;
                conns.insert(
                    udid.to_owned(),
                    WdaConnection {
                        base_url: base_url.clone(),
                        session_id: None,
                        forward: Some(ForwardProc { child, local_port }),
                        last_interaction: Instant::now(),
                        snapshot_depth: None,
                    },
                );
                Ok(Some(base_url))
            }
            Err(DeviceError::ToolchainMissing { tool, hint }) => {
                Err(DeviceError::ToolchainMissing { tool, hint })
            }
            Err(e) => {
                tracing::debug!(udid = %short_udid(udid), err = %e, "usbmux forward unavailable");
                Ok(None)
            }
        }
    }

    async fn try_tunnel(&self, udid: &str) -> Option<String> {
        let http = &self.inner.http;
        let hw_udid = tunnel::resolve_tunnel_udid(http, udid).await?;
        let devices = tunnel::tunneld_devices(http).await;
        let tunnels = devices.get(&hw_udid)?;
        let base_url = tunnel::tunnel_base_url(tunnels, WDA_PORT)?;

        if self.probe_status(&base_url, DISCOVERY_PROBE_TIMEOUT).await {
            tracing::info!(udid = %short_udid(udid), url = %base_url, "WDA reachable via tunnel");
            Some(base_url)
        } else {
            tracing::debug!(udid = %short_udid(udid), url = %base_url, "WDA not reachable via tunnel");
            None
        }
    }

    /// Spawn a USB-mux `forward LOCAL → device:8100` subprocess and verify
    /// WDA answers through it.
    async fn start_forward(
        &self,
        udid: &str,
    ) -> Result<(String, tokio::process::Child, u16), DeviceError> {
        let binary = tunnel::find_forwarder_binary().ok_or_else(|| DeviceError::ToolchainMissing {
            tool: "pymobiledevice3".to_owned(),
            hint: "Needed for USB port forwarding to WDA. Install: pipx install pymobiledevice3"
                .to_owned(),
        })?;

        let local_port = self.inner.next_forward_port.fetch_add(1, Ordering::SeqCst);

        let mut cmd = tokio::process::Command::new(binary);
        cmd.arg("usbmux")
            .arg("forward")
            .arg(local_port.to_string())
            .arg(WDA_PORT.to_string())
            .args(["--udid", udid])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|e| DeviceError::Unknown(format!("failed to spawn usbmux forward: {e}")))?;

        tokio::time::sleep(FORWARD_BIND_GRACE).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(DeviceError::Transport(format!(
                "usbmux forward exited immediately for {} (status {status})",
                short_udid(udid)
            )));
        }

        let base_url = format!("http://localhost:{local_port}");
        if !self.probe_status(&base_url, DISCOVERY_PROBE_TIMEOUT).await {
            let _ = child.start_kill();
            return Err(DeviceError::Transport(format!(
                "cannot connect to WDA on {} via usbmux forward. Ensure WDA is running on \
                 the device.",
                short_udid(udid)
            )));
        }

        tracing::info!(
            udid = %short_udid(udid),
            url = %base_url,
            "WDA reachable via usbmux forward"
        );
        Ok((base_url, child, local_port))
    }

    /// Drop a device's cached connection. Any session id dies with it, and
    /// an owned forward subprocess is torn down so it cannot outlive the
    /// connection that spawned it.
    async fn invalidate(&self, udid: &str) {
        let removed = self.inner.connections.write().await.remove(udid);
        if let Some(conn) = removed {
            if let Some(forward) = conn.forward {
                tokio::spawn(terminate_forward(forward));
            }
        }
    }

    async fn touch(&self, udid: &str) {
        let mut conns = self.inner.connections.write().await;
        if let Some(conn) = conns.get_mut(udid) {
            conn.last_interaction = Instant::now();
        }
    }

    // ------------------------------------------------------------------
    // Session management
    // ------------------------------------------------------------------

    async fn cached_session(&self, udid: &str) -> Option<String> {
        self.inner.connections.read().await.get(udid)?.session_id.clone()
    }

    async fn session_lock(&self, udid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.session_locks.lock().await;
        Arc::clone(locks.entry(udid.to_owned()).or_default())
    }

    /// Create or return the device's WDA session.
    ///
    /// check → lock → re-check → create: the fast path is lock-free, and
    /// concurrent callers (the skeleton fan-out in particular) collapse to
    /// a single `POST /session`.
    async fn ensure_session(&self, udid: &str) -> Result<String, DeviceError> {
        if let Some(session_id) = self.cached_session(udid).await {
            return Ok(session_id);
        }

        let lock = self.session_lock(udid).await;
        let _guard = lock.lock().await;
        if let Some(session_id) = self.cached_session(udid).await {
            return Ok(session_id);
        }

        let base_url = self.base_url(udid).await?;
        let resp = self
            .inner
            .http
            .post(format!("{base_url}/session"))
            .json(&serde_json::json!({"capabilities": {}}))
            .timeout(WDA_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                DeviceError::Transport(format!(
                    "session creation failed on {}: {e}",
                    short_udid(udid)
                ))
            })?;
        if !resp.status().is_success() {
            return Err(DeviceError::Transport(format!(
                "session creation failed (status {})",
                resp.status().as_u16()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DeviceError::Transport(format!("session response unreadable: {e}")))?;
        let session_id = body
            .get("sessionId")
            .and_then(|v| v.as_str())
            .or_else(|| body.pointer("/value/sessionId").and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_owned();
        if session_id.is_empty() {
            return Err(DeviceError::Transport("session response missing sessionId".to_owned()));
        }

        {
            let mut conns = self.inner.connections.write().await;
            if let Some(conn) = conns.get_mut(udid) {
                conn.session_id = Some(session_id.clone());
            }
        }
        tracing::info!(
            udid = %short_udid(udid),
            session = %short_udid(&session_id),
            "WDA session created"
        );

        // Settings for complex screens: cap the snapshot depth (the device
        // default deadlocks on map screens with hundreds of annotations)
        // and make element queries return full attributes.
        let settings = serde_json::json!({
            "settings": {
                "snapshotMaxDepth": SNAPSHOT_MAX_DEPTH,
                "shouldUseCompactResponses": false,
                "elementResponseAttributes": ELEMENT_RESPONSE_ATTRIBUTES,
            }
        });
        let pushed = self
            .inner
            .http
            .post(format!("{base_url}/session/{session_id}/appium/settings"))
            .json(&settings)
            .timeout(WDA_TIMEOUT)
            .send()
            .await;
        match pushed {
            Ok(resp) if resp.status().is_success() => {
                let mut conns = self.inner.connections.write().await;
                if let Some(conn) = conns.get_mut(udid) {
                    conn.snapshot_depth = Some(SNAPSHOT_MAX_DEPTH);
                }
            }
            _ => {
                tracing::debug!(udid = %short_udid(udid), "failed to configure WDA settings");
            }
        }

        Ok(session_id)
    }

    /// Push a new snapshotMaxDepth if it differs from the cached value.
    async fn set_snapshot_depth(&self, udid: &str, depth: u32) {
        {
            let conns = self.inner.connections.read().await;
            if conns.get(udid).and_then(|c| c.snapshot_depth) == Some(depth) {
                return;
            }
        }

        let session_id = match self.ensure_session(udid).await {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(udid = %short_udid(udid), err = %e, "cannot set snapshot depth");
                return;
            }
        };
        let Some(base_url) = self.current_base_url(udid).await else { return };

        let body = serde_json::json!({"settings": {"snapshotMaxDepth": depth}});
        let resp = self
            .inner
            .http
            .post(format!("{base_url}/session/{session_id}/appium/settings"))
            .json(&body)
            .timeout(WDA_TIMEOUT)
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => {
                let mut conns = self.inner.connections.write().await;
                if let Some(conn) = conns.get_mut(udid) {
                    conn.snapshot_depth = Some(depth);
                }
                tracing::info!(udid = %short_udid(udid), depth, "WDA snapshotMaxDepth updated");
            }
            _ => {
                tracing::debug!(udid = %short_udid(udid), depth, "snapshot depth update failed");
            }
        }
    }

    async fn current_base_url(&self, udid: &str) -> Option<String> {
        Some(self.inner.connections.read().await.get(udid)?.base_url.clone())
    }

    /// Delete the device's WDA session. No-op without one.
    pub async fn delete_session(&self, udid: &str) {
        let (base_url, session_id) = {
            let conns = self.inner.connections.read().await;
            let Some(conn) = conns.get(udid) else { return };
            let Some(ref session_id) = conn.session_id else { return };
            (conn.base_url.clone(), session_id.clone())
        };

        let result = self
            .inner
            .http
            .delete(format!("{base_url}/session/{session_id}"))
            .timeout(WDA_TIMEOUT)
            .send()
            .await;
        if result.is_err() {
            tracing::debug!(
                udid = %short_udid(udid),
                session = %short_udid(&session_id),
                "failed to delete WDA session"
            );
        }

        let mut conns = self.inner.connections.write().await;
        if let Some(conn) = conns.get_mut(udid) {
            conn.session_id = None;
            conn.snapshot_depth = None;
        }
        tracing::info!(udid = %short_udid(udid), "WDA session deleted");
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Start the idle reaper on first interaction. Exactly one per client;
    /// it deletes sessions idle beyond the threshold but leaves the driver
    /// process running, so reconnecting stays cheap.
    fn ensure_reaper(&self) {
        if self.inner.reaper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(IDLE_CHECK_INTERVAL);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = client.inner.shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let now = Instant::now();
                let idle: Vec<String> = {
                    let conns = client.inner.connections.read().await;
                    conns
                        .iter()
                        .filter(|(_, c)| now.duration_since(c.last_interaction) > IDLE_TIMEOUT)
                        .map(|(udid, _)| udid.clone())
                        .collect()
                };
                for udid in idle {
                    tracing::info!(
                        udid = %short_udid(&udid),
                        "WDA idle timeout — deleting session (driver stays running)"
                    );
                    client.delete_session(&udid).await;
                    client.invalidate(&udid).await;
                }
            }
        });
    }

    /// Single dispatch primitive for WDA requests.
    ///
    /// Transport errors invalidate the cached connection; `raise_on_timeout`
    /// opts out of invalidation for timeouts specifically (WDA may just be
    /// slow on this request, e.g. `/source`). Successful requests bump the
    /// idle clock.
    async fn dispatch(
        &self,
        udid: &str,
        req: WdaRequest<'_>,
    ) -> Result<reqwest::Response, DeviceError> {
        let url = if req.use_session {
            let session_id = self.ensure_session(udid).await?;
            let base_url = self.current_base_url(udid).await.ok_or_else(|| {
                DeviceError::Transport(format!("connection lost on {}", short_udid(udid)))
            })?;
            format!("{base_url}/session/{session_id}{}", req.path)
        } else {
            format!("{}{}", self.base_url(udid).await?, req.path)
        };

        let mut builder = self.inner.http.request(req.method, url).timeout(req.timeout);
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }
        if !req.query.is_empty() {
            builder = builder.query(req.query);
        }

        match builder.send().await {
            Ok(resp) => {
                self.touch(udid).await;
                self.ensure_reaper();
                Ok(resp)
            }
            Err(e) if req.raise_on_timeout && e.is_timeout() => {
                Err(DeviceError::Timeout(format!("{} on {}", req.path, short_udid(udid))))
            }
            Err(e) => {
                self.invalidate(udid).await;
                Err(DeviceError::Transport(format!(
                    "connection failed on {} ({e}). Ensure WDA is running on the device.",
                    short_udid(udid)
                )))
            }
        }
    }

    /// Quick `/status` ping to check whether WDA is still alive.
    async fn is_responsive(&self, udid: &str) -> bool {
        let base_url = match self.current_base_url(udid).await {
            Some(url) => url,
            None => match self.base_url(udid).await {
                Ok(url) => url,
                Err(_) => return false,
            },
        };
        self.probe_status(&base_url, STATUS_PROBE_TIMEOUT).await
    }

    /// Stop and restart the driver, clearing the cached connection.
    async fn restart_driver(&self, udid: &str) {
        self.invalidate(udid).await;

        let Some(os_version) = self.os_version(udid) else {
            tracing::warn!(udid = %short_udid(udid), "cannot restart WDA — os_version unknown");
            return;
        };

        if let Err(e) = lifecycle::stop_driver(udid).await {
            tracing::debug!(udid = %short_udid(udid), err = %e, "stop before restart failed");
        }
        match lifecycle::start_driver(udid, &os_version).await {
            Ok(result) if result.ready == Some(true) => {}
            Ok(_) => {
                tracing::warn!(udid = %short_udid(udid), "driver restarted but not responsive");
            }
            Err(e) => {
                tracing::warn!(udid = %short_udid(udid), err = %e, "driver restart failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // UI automation operations
    // ------------------------------------------------------------------

    async fn fetch_source(&self, udid: &str) -> Result<Option<SourceNode>, DeviceError> {
        // `/source` itself is sessionless, but the snapshot settings only
        // exist per session — make sure they are in place before walking
        // the tree.
        self.ensure_session(udid).await?;

        let result = self
            .dispatch(
                udid,
                WdaRequest {
                    timeout: SOURCE_TIMEOUT,
                    raise_on_timeout: true,
                    query: &[("format", "json")],
                    ..WdaRequest::new(Method::GET, "/source")
                },
            )
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(DeviceError::Timeout(_)) => {
                tracing::warn!(
                    udid = %short_udid(udid),
                    "/source timed out — falling back to element queries"
                );
                if !self.is_responsive(udid).await {
                    tracing::warn!(udid = %short_udid(udid), "WDA hung, restarting driver");
                    self.restart_driver(udid).await;
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !resp.status().is_success() {
            return Err(DeviceError::Transport(format!(
                "/source failed (status {})",
                resp.status().as_u16()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DeviceError::Transport(format!("/source response unreadable: {e}")))?;
        let tree = body.get("value").cloned().unwrap_or(body);
        let node: SourceNode = serde_json::from_value(tree)
            .map_err(|e| DeviceError::Transport(format!("/source tree undecodable: {e}")))?;
        Ok(Some(node))
    }

    /// All UI elements of the current screen as a flat list.
    ///
    /// On a `/source` soft timeout the driver's liveness is checked (and
    /// the driver restarted if hung), then the skeleton fallback runs —
    /// callers see a successful, possibly partial, result.
    pub async fn describe_all(
        &self,
        udid: &str,
        snapshot_depth: Option<u32>,
    ) -> Result<Vec<AxElement>, DeviceError> {
        if let Some(depth) = snapshot_depth {
            self.set_snapshot_depth(udid, depth).await;
        }

        match self.fetch_source(udid).await? {
            Some(tree) => {
                let flat = wire::flatten_source_tree(&tree);
                tracing::debug!(udid = %short_udid(udid), elements = flat.len(), "described screen");
                Ok(flat)
            }
            None => self.build_screen_skeleton(udid).await,
        }
    }

    /// UI elements with hierarchy preserved.
    ///
    /// The timeout fallback degrades to the *flat* skeleton — no nested
    /// variant exists, and callers must tolerate that.
    pub async fn describe_all_nested(
        &self,
        udid: &str,
        snapshot_depth: Option<u32>,
    ) -> Result<Vec<AxNode>, DeviceError> {
        if let Some(depth) = snapshot_depth {
            self.set_snapshot_depth(udid, depth).await;
        }

        match self.fetch_source(udid).await? {
            Some(tree) => Ok(vec![wire::convert_source_tree(&tree)]),
            None => {
                let flat = self.build_screen_skeleton(udid).await?;
                Ok(flat
                    .into_iter()
                    .map(|element| AxNode { element, children: Vec::new() })
                    .collect())
            }
        }
    }

    /// The deepest element whose frame contains `(x, y)`. WDA has no
    /// native describe-point, so this fetches the flat tree and scans it.
    pub async fn describe_point(&self, udid: &str, x: f64, y: f64) -> Option<AxElement> {
        match self.describe_all(udid, None).await {
            Ok(elements) => crate::elements::find_element_at_point(&elements, x, y).cloned(),
            Err(e) => {
                tracing::debug!(udid = %short_udid(udid), err = %e, "describe_point failed");
                None
            }
        }
    }

    async fn session_post(
        &self,
        udid: &str,
        path: &str,
        body: serde_json::Value,
        op: &str,
    ) -> Result<(), DeviceError> {
        let resp = self.dispatch(udid, WdaRequest::session_post(path, body)).await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(DeviceError::Transport(format!(
                "{op} failed (status {status}): {snippet}"
            )));
        }
        Ok(())
    }

    pub async fn tap(&self, udid: &str, x: f64, y: f64) -> Result<(), DeviceError> {
        self.session_post(udid, "/wda/tap", serde_json::json!({"x": x, "y": y}), "tap").await
    }

    pub async fn swipe(
        &self,
        udid: &str,
        start_x: f64,
        start_y: f64,
        end_x: f64,
        end_y: f64,
        duration: f64,
    ) -> Result<(), DeviceError> {
        let body = serde_json::json!({
            "fromX": start_x,
            "fromY": start_y,
            "toX": end_x,
            "toY": end_y,
            "duration": duration,
        });
        self.session_post(udid, "/wda/dragfromtoforduration", body, "swipe").await
    }

    pub async fn type_text(&self, udid: &str, text: &str) -> Result<(), DeviceError> {
        let keys: Vec<String> = text.chars().map(|c| c.to_string()).collect();
        self.session_post(udid, "/wda/keys", serde_json::json!({"value": keys}), "type_text").await
    }

    pub async fn press_button(&self, udid: &str, button: &str) -> Result<(), DeviceError> {
        self.session_post(udid, "/wda/pressButton", serde_json::json!({"name": button}), "press")
            .await
    }

    /// Clear a text field near `(x, y)`.
    ///
    /// Finds the field by class-name priority (the caller's hint first) and
    /// calls WDA's native clear; if nothing bites, falls back to triple-tap
    /// plus a backspace keystroke.
    pub async fn clear_text(
        &self,
        udid: &str,
        x: f64,
        y: f64,
        element_type: Option<&str>,
    ) -> Result<(), DeviceError> {
        const CLASS_MAP: &[(&str, &str)] = &[
            ("SearchField", "XCUIElementTypeSearchField"),
            ("TextField", "XCUIElementTypeTextField"),
            ("SecureTextField", "XCUIElementTypeSecureTextField"),
            ("TextArea", "XCUIElementTypeTextView"),
        ];

        let mut class_names: Vec<&str> = Vec::new();
        if let Some(hint) = element_type {
            if let Some((_, class)) = CLASS_MAP.iter().find(|(k, _)| *k == hint) {
                class_names.push(class);
            }
        }
        for (_, class) in CLASS_MAP {
            if !class_names.contains(class) {
                class_names.push(class);
            }
        }

        for class_name in class_names {
            match self.native_clear(udid, class_name).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(udid = %short_udid(udid), class = class_name, err = %e, "native clear failed");
                }
            }
        }

        // Fallback: triple-tap to select, then backspace.
        for _ in 0..3 {
            self.tap(udid, x, y).await?;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.session_post(udid, "/wda/keys", serde_json::json!({"value": ["\u{8}"]}), "clear_text")
            .await
    }

    async fn native_clear(&self, udid: &str, class_name: &str) -> Result<bool, DeviceError> {
        let body = serde_json::json!({"using": "class name", "value": class_name});
        let resp = self.dispatch(udid, WdaRequest::session_post("/element", body)).await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let Some(element_id) = body.get("value").and_then(wire::element_ref) else {
            return Ok(false);
        };

        let clear_path = format!("/element/{element_id}/clear");
        let clear = self
            .dispatch(
                udid,
                WdaRequest { use_session: true, ..WdaRequest::new(Method::POST, &clear_path) },
            )
            .await?;
        Ok(clear.status().is_success())
    }

    /// Query WDA for elements with a locator strategy, optionally scoped to
    /// a parent element's direct children.
    ///
    /// Timeouts and non-200 responses degrade to an empty list — the
    /// skeleton engine must never abort on a single failed query.
    pub async fn find_elements_by_query(
        &self,
        udid: &str,
        using: &str,
        value: &str,
        scope_element_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Vec<QueryHit> {
        let session_id = match self.ensure_session(udid).await {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(udid = %short_udid(udid), err = %e, "element query without session");
                return Vec::new();
            }
        };
        let Some(base_url) = self.current_base_url(udid).await else {
            return Vec::new();
        };

        let url = match scope_element_id {
            Some(scope) => format!("{base_url}/session/{session_id}/element/{scope}/elements"),
            None => format!("{base_url}/session/{session_id}/elements"),
        };

        let resp = self
            .inner
            .http
            .post(url)
            .json(&serde_json::json!({"using": using, "value": value}))
            .timeout(timeout.unwrap_or(SKELETON_QUERY_TIMEOUT))
            .send()
            .await;
        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(
                    udid = %short_udid(udid),
                    using, value, status = r.status().as_u16(),
                    "element query non-200"
                );
                return Vec::new();
            }
            Err(e) => {
                tracing::debug!(udid = %short_udid(udid), using, value, err = %e, "element query failed");
                return Vec::new();
            }
        };

        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let raw: Vec<wire::QueryElement> = body
            .get("value")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        self.touch(udid).await;
        self.ensure_reaper();

        raw.iter().map(|el| wire::map_query_element(el, value)).collect()
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Tear everything down: cancel the idle reaper, delete every active
    /// session (best-effort), terminate every forward subprocess, clear
    /// all caches.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let udids: Vec<String> = {
            let conns = self.inner.connections.read().await;
            conns
                .iter()
                .filter(|(_, c)| c.session_id.is_some())
                .map(|(udid, _)| udid.clone())
                .collect()
        };
        for udid in udids {
            self.delete_session(&udid).await;
        }

        let drained: Vec<WdaConnection> = {
            let mut conns = self.inner.connections.write().await;
            conns.drain().map(|(_, conn)| conn).collect()
        };
        for conn in drained {
            if let Some(forward) = conn.forward {
                terminate_forward(forward).await;
            }
        }
        self.inner.session_locks.lock().await.clear();
    }
}

/// Graceful-then-force termination of a forward subprocess.
async fn terminate_forward(mut forward: ForwardProc) {
    if let Some(pid) = forward.child.id() {
        proc::terminate(pid as i32);
    }
    let waited = tokio::time::timeout(FORWARD_STOP_GRACE, forward.child.wait()).await;
    if waited.is_err() {
        tracing::debug!(port = forward.local_port, "forward ignored SIGTERM, killing");
        let _ = forward.child.start_kill();
        let _ = forward.child.wait().await;
    }
}
