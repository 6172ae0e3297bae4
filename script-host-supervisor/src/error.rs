//! Typed errors for script supervision and dependency installation.

use std::path::PathBuf;

use script_host_ipc::ChannelError;
use thiserror::Error;

/// Errors surfaced synchronously by the supervisor or through a stop result.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No Tokio runtime is available to drive the supervision task.
    #[error("script supervision requires a running Tokio runtime")]
    NoRuntime,

    /// The platform could not create the child process.
    #[error("failed to spawn script '{}': {source}", path.display())]
    Spawn {
        /// Resolved script path.
        path: PathBuf,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// A standard stream was not captured at spawn time.
    #[error("failed to capture script {0}")]
    StdioCapture(&'static str),

    /// The message channel could not be created or used.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The handle no longer refers to a connected process.
    #[error("{pid} process no longer valid for termination.")]
    NotConnected {
        /// Process id of the stale handle.
        pid: u32,
    },

    /// The process has already exited.
    #[error("process {pid} is not running")]
    NotRunning {
        /// Process id of the exited process.
        pid: u32,
    },

    /// Severing the channel after the grace period failed.
    #[error("script disconnect error: {0}")]
    Disconnect(String),
}

/// Errors reported by the dependency installer.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The helper process could not be started.
    #[error("failed to start installer helper: {0}")]
    Start(#[from] SupervisorError),

    /// The install request could not be delivered to the helper.
    #[error("failed to send install request: {0}")]
    Request(#[source] ChannelError),

    /// The helper did not report a result before the deadline.
    #[error("installer helper did not respond within {timeout_ms} ms")]
    Timeout {
        /// Configured deadline.
        timeout_ms: u64,
    },

    /// The helper went away without reporting a result.
    #[error("installer helper exited without reporting a result")]
    HelperExited,
}
