// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess helpers: bounded runs and PID liveness.

use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::error::DeviceError;

/// Captured output of a finished subprocess.
#[derive(Debug)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `n` lines of stdout — xcodebuild buries the useful part at
    /// the end of a very long transcript.
    pub fn stdout_tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self.stdout.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Run `cmd` to completion with a wall-clock budget.
///
/// A spawn failure with `NotFound` maps to `ToolchainMissing`; exceeding
/// the budget kills the child and maps to `ToolTimeout`, which callers can
/// tell apart from a nonzero exit.
pub async fn run_tool(
    tool: &str,
    mut cmd: Command,
    timeout: Duration,
) -> Result<ToolOutput, DeviceError> {
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeviceError::ToolchainMissing {
                tool: tool.to_owned(),
                hint: "Install it and ensure it is on PATH.".to_owned(),
            }
        } else {
            DeviceError::Unknown(format!("failed to spawn {tool}: {e}"))
        }
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| DeviceError::ToolTimeout { tool: tool.to_owned(), secs: timeout.as_secs() })?
        .map_err(|e| DeviceError::Unknown(format!("{tool} wait failed: {e}")))?;

    Ok(ToolOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Checks whether a process with the given PID is alive (zero-signal probe).
pub fn is_process_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

/// Send SIGTERM to a PID. Errors (already dead, not ours) are ignored.
pub fn terminate(pid: i32) {
    let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
}

/// Send SIGKILL to a PID. Errors are ignored.
pub fn kill(pid: i32) {
    let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
}

#[cfg(test)]
#[path = "proc_tests.rs"]
mod tests;
