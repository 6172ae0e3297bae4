//! Shared integration test helpers for script-host.
//!
//! Include this module at the top of each test file that needs it:
//!
//! ```ignore
//! mod common;
//! use common::{test_config, write_script, collect_until_end};
//! ```
//!
//! Fixture scripts are POSIX `sh` files written into a `TempDir` and run
//! through the `sh` interpreter (the `.sh` extension is mapped in
//! [`test_config`]), so they never need the executable bit.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use script_host::config::ScriptHostConfig;
use script_host::supervisor::SinkEvent;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Upper bound for any single wait in the integration tests.
pub const TEST_DEADLINE: Duration = Duration::from_secs(10);

/// Default config with `.sh` scripts run through `sh` and a generous drain.
pub fn test_config() -> ScriptHostConfig {
    let mut config = ScriptHostConfig::default();
    config
        .interpreters
        .insert("sh".to_string(), "sh".to_string());
    config.drain_timeout_ms = 2_000;
    config
}

/// Creates a temporary directory for fixture scripts.
///
/// The `TempDir` must be kept alive for the duration of the test.
pub fn script_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

/// Write a `sh` fixture script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write script");
    path
}

/// Shell line that emits one channel event with the given JSON `args`.
pub fn emit_line(name: &str, args_json: &str) -> String {
    format!(
        "printf '%s\\n' '{{\"channel\":\"script-host\",\"kind\":\"event\",\"name\":\"{name}\",\"args\":{args_json}}}' >&3"
    )
}

/// Receive sink events until (and including) the one named `end_name`.
pub async fn collect_until_end(
    rx: &mut UnboundedReceiver<SinkEvent>,
    end_name: &str,
) -> Vec<SinkEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(TEST_DEADLINE, async {
        while let Some(event) = rx.recv().await {
            let done = event.name == end_name;
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("Timed out waiting for the end event");
    events
}

/// Names of the collected events, in order.
pub fn names(events: &[SinkEvent]) -> Vec<&str> {
    events.iter().map(|e| e.name.as_str()).collect()
}
