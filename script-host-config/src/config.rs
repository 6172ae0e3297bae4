//! Top-level configuration for the script host.
//!
//! [`ScriptHostConfig`] is loaded from `~/.config/script-host/config.yaml`.
//! Every field has a default, so a missing file or a partial file is valid.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Log level for the debug log bridge.
///
/// `RUST_LOG` and the `--log-level` CLI flag take precedence over this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No logging (log file not created)
    #[default]
    Off,
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Most verbose
    Trace,
}

impl LogLevel {
    /// Convert to `log::LevelFilter`
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// The distinguished event names emitted to the event sink by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventNames {
    /// Emitted with the accumulated stderr text when a script exits with the
    /// application-error status.
    #[serde(default = "crate::defaults::script_error_event")]
    pub script_error: String,

    /// Emitted with the process id whenever a script process ends.
    #[serde(default = "crate::defaults::script_end_event")]
    pub script_end: String,

    /// Emitted with `{pid, message}` for every stdout line of a script.
    #[serde(default = "crate::defaults::script_log_event")]
    pub script_log: String,
}

impl Default for EventNames {
    fn default() -> Self {
        Self {
            script_error: crate::defaults::script_error_event(),
            script_end: crate::defaults::script_end_event(),
            script_log: crate::defaults::script_log_event(),
        }
    }
}

/// Settings for the dependency-installer helper process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallerConfig {
    /// Path to the helper script that performs the installation.
    #[serde(default = "crate::defaults::helper_script")]
    pub helper_script: PathBuf,

    /// Deadline for the helper to report its result, in milliseconds.
    #[serde(default = "crate::defaults::installer_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            helper_script: crate::defaults::helper_script(),
            timeout_ms: crate::defaults::installer_timeout_ms(),
        }
    }
}

/// Configuration for the script host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptHostConfig {
    /// Directory holding bundled helper scripts.
    #[serde(default = "crate::defaults::scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Base path that script names are resolved against when the caller does
    /// not supply one.
    #[serde(default = "crate::defaults::default_base_path")]
    pub default_base_path: PathBuf,

    /// Delay between the terminate request and forced channel disconnect.
    #[serde(default = "crate::defaults::stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Upper bound on draining stdout/stderr after the child has exited.
    #[serde(default = "crate::defaults::drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Interpreter command per script file extension (without the dot).
    /// Scripts with other extensions are executed directly.
    #[serde(default = "crate::defaults::interpreters")]
    pub interpreters: HashMap<String, String>,

    /// Distinguished sink event names.
    #[serde(default)]
    pub events: EventNames,

    /// Dependency installer settings.
    #[serde(default)]
    pub installer: InstallerConfig,

    /// Log level for the debug log file.
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for ScriptHostConfig {
    fn default() -> Self {
        Self {
            scripts_dir: crate::defaults::scripts_dir(),
            default_base_path: crate::defaults::default_base_path(),
            stop_grace_ms: crate::defaults::stop_grace_ms(),
            drain_timeout_ms: crate::defaults::drain_timeout_ms(),
            interpreters: crate::defaults::interpreters(),
            events: EventNames::default(),
            installer: InstallerConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl ScriptHostConfig {
    /// Load the configuration from the default location.
    ///
    /// Returns the defaults when no config file exists yet.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        log::info!("Config path: {:?}", config_path);

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            log::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load and validate the configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self =
            serde_yaml_ng::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to an explicit path.
    ///
    /// Writes to a temp file first and renames it into place so a crash never
    /// leaves a truncated config behind.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let yaml = self.to_yaml()?;
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, &yaml).map_err(io_err)?;
        fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml_ng::to_string(self).map_err(ConfigError::Serialize)
    }

    /// Check semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_grace_ms == 0 {
            return Err(ConfigError::Validation(
                "stop_grace_ms must be greater than zero".to_string(),
            ));
        }
        if self.installer.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "installer.timeout_ms must be greater than zero".to_string(),
            ));
        }

        let names = [
            ("events.script_error", &self.events.script_error),
            ("events.script_end", &self.events.script_end),
            ("events.script_log", &self.events.script_log),
        ];
        for (field, name) in names {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{field} must not be empty")));
            }
        }
        for (i, (field_a, a)) in names.iter().enumerate() {
            for (field_b, b) in &names[i + 1..] {
                if a == b {
                    return Err(ConfigError::Validation(format!(
                        "{field_a} and {field_b} must differ (both are '{a}')"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Interpreter configured for `script`'s extension, if any.
    pub fn interpreter_for(&self, script: &Path) -> Option<&str> {
        let ext = script.extension()?.to_str()?;
        self.interpreters.get(ext).map(String::as_str)
    }

    /// Get the configuration file path (using XDG convention)
    pub fn config_path() -> PathBuf {
        crate::config_dir().join("config.yaml")
    }
}
