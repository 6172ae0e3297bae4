//! Script process supervision for script-host.
//!
//! - [`process`] - spawn a script, route its channel events and output to an
//!   [`EventSink`], report its exit, stop it
//! - [`installer`] - run the dependency-installer helper to completion
//! - [`manager`] - pid-keyed registry of started scripts
//! - [`naming`] - process-scoped event names
//! - [`sink`] - the outbound event sink trait and a channel-backed sink
//! - [`stream`] - stderr fragment handling

pub mod error;
pub mod installer;
pub mod manager;
pub mod naming;
pub mod process;
pub mod sink;
pub mod stream;

pub use error::{InstallError, SupervisorError};
pub use installer::{Installer, start_npm_script};
pub use manager::ScriptManager;
pub use naming::{parse_routed_event_name, routed_event_name};
pub use process::{
    APPLICATION_ERROR_EXIT_CODE, ProcessHandle, Supervisor, route_event, stop_script,
};
pub use sink::{ChannelSink, EventSink, SinkEvent};
pub use stream::ErrorAccumulator;
