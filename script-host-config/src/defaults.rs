//! Default value functions for configuration.
//!
//! Used as `#[serde(default = "crate::defaults::...")]` attributes on
//! [`crate::ScriptHostConfig`] fields and by its `Default` impl, so a partial
//! YAML file and `ScriptHostConfig::default()` agree.

use std::collections::HashMap;
use std::path::PathBuf;

// ── Paths ──────────────────────────────────────────────────────────────────

pub fn default_base_path() -> PathBuf {
    PathBuf::from("./")
}

pub fn scripts_dir() -> PathBuf {
    crate::config_dir().join("scripts")
}

pub fn helper_script() -> PathBuf {
    scripts_dir().join("npmManager.js")
}

// ── Timing ─────────────────────────────────────────────────────────────────

pub fn stop_grace_ms() -> u64 {
    100
}

pub fn drain_timeout_ms() -> u64 {
    500
}

pub fn installer_timeout_ms() -> u64 {
    300_000
}

// ── Event names ────────────────────────────────────────────────────────────

pub fn script_error_event() -> String {
    "childScriptError".to_string()
}

pub fn script_end_event() -> String {
    "childScriptEnd".to_string()
}

pub fn script_log_event() -> String {
    "scriptLog".to_string()
}

// ── Interpreters ───────────────────────────────────────────────────────────

pub fn interpreters() -> HashMap<String, String> {
    HashMap::from([
        ("js".to_string(), "node".to_string()),
        ("mjs".to_string(), "node".to_string()),
        ("py".to_string(), "python3".to_string()),
    ])
}
