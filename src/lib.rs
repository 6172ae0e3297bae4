// Library exports for the binary and the integration tests.
//
// The supervision logic lives in the workspace crates; this package adds the
// log bridge, the CLI and the JSON-lines event output.

/// Application version (root crate version).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod debug;
pub mod output;
pub mod runner;

pub use script_host_config as config;
pub use script_host_ipc as ipc;
pub use script_host_supervisor as supervisor;
