//! Typed error variants for the script-host-config crate.
//!
//! Callers at the crate boundary can match on specific failure modes instead
//! of relying on opaque `anyhow` strings. The binary still wraps these in
//! `anyhow::Error` at the top level.

use thiserror::Error;

/// Errors that can occur when loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error occurred reading or writing the config file.
    #[error("I/O error accessing config '{path}': {source}")]
    Io {
        /// Path that was being read or written.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file contained invalid YAML.
    #[error("YAML parse error in config '{path}': {source}")]
    Parse {
        /// Path of the offending file.
        path: String,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// The config could not be serialized back to YAML.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml_ng::Error),

    /// A field value failed semantic validation.
    ///
    /// The inner string names the field and why it is invalid.
    #[error("Config validation error: {0}")]
    Validation(String),
}
