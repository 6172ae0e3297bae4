//! Configuration system for the script host.
//!
//! This crate provides configuration loading, saving, and default values for
//! the script supervisor. It includes:
//!
//! - The distinguished sink event names (script error / script end / log)
//! - Dependency-installer helper location and deadline
//! - Stop grace period, exit drain bound, and per-extension interpreters

pub mod config;
pub mod defaults;
pub mod error;

use std::path::PathBuf;

pub use config::{EventNames, InstallerConfig, LogLevel, ScriptHostConfig};
pub use error::ConfigError;

/// Directory holding the script-host configuration (`~/.config/script-host`).
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("script-host")
        } else {
            PathBuf::from(".")
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home_dir) = dirs::home_dir() {
            home_dir.join(".config").join("script-host")
        } else {
            // Fallback if home directory cannot be determined
            PathBuf::from(".")
        }
    }
}
