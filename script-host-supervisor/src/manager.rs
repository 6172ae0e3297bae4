//! Registry of the scripts started on behalf of one host.
//!
//! [`ScriptManager`] keeps the [`ProcessHandle`] of every script it started,
//! keyed by pid, and kills whatever is still running when it is dropped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SupervisorError;
use crate::process::{ProcessHandle, Supervisor};
use crate::sink::EventSink;

/// Manages the script processes of a single host, all reporting to one sink.
pub struct ScriptManager {
    supervisor: Supervisor,
    sink: Arc<dyn EventSink>,
    /// Handles keyed by pid.
    processes: HashMap<u32, ProcessHandle>,
}

impl ScriptManager {
    /// Create an empty manager that starts scripts through `supervisor`.
    pub fn new(supervisor: Supervisor, sink: Arc<dyn EventSink>) -> Self {
        Self {
            supervisor,
            sink,
            processes: HashMap::new(),
        }
    }

    /// Start a script and track it.
    ///
    /// Returns the pid of the new process.
    ///
    /// # Errors
    /// Whatever [`Supervisor::start_script`] reports.
    pub fn start_script(
        &mut self,
        name: &str,
        base_path: Option<&Path>,
    ) -> Result<u32, SupervisorError> {
        let handle = self
            .supervisor
            .start_script(name, Arc::clone(&self.sink), base_path)?;
        let pid = handle.pid();
        self.processes.insert(pid, handle);
        Ok(pid)
    }

    /// Check if a tracked script is still running.
    ///
    /// Returns `false` for unknown pids.
    pub fn is_running(&self, pid: u32) -> bool {
        self.processes.get(&pid).is_some_and(ProcessHandle::is_running)
    }

    /// The handle of a tracked script, if any.
    pub fn handle(&self, pid: u32) -> Option<&ProcessHandle> {
        self.processes.get(&pid)
    }

    /// Send a custom event to one tracked script.
    ///
    /// # Errors
    /// [`SupervisorError::NotConnected`] for unknown pids or closed channels.
    pub async fn send_event(
        &self,
        pid: u32,
        name: &str,
        args: Vec<Value>,
    ) -> Result<(), SupervisorError> {
        let handle = self
            .processes
            .get(&pid)
            .ok_or(SupervisorError::NotConnected { pid })?;
        handle.send_event(name, args).await
    }

    /// Gracefully stop and forget one script.
    ///
    /// # Errors
    /// [`SupervisorError::NotConnected`] for unknown pids, otherwise whatever
    /// [`ProcessHandle::stop`] reports.
    pub async fn stop_script(&mut self, pid: u32) -> Result<u32, SupervisorError> {
        let handle = self
            .processes
            .remove(&pid)
            .ok_or(SupervisorError::NotConnected { pid })?;
        handle.stop().await
    }

    /// Kill and forget every tracked script.
    pub fn stop_all(&mut self) {
        for (pid, handle) in self.processes.drain() {
            if handle.is_running() {
                log::info!("Killing script {pid}");
                let _ = handle.kill();
            }
        }
    }

    /// Forget scripts whose exit has been observed, returning their pids.
    pub fn prune_finished(&mut self) -> Vec<u32> {
        let finished: Vec<u32> = self
            .processes
            .iter()
            .filter(|(_, handle)| !handle.is_running())
            .map(|(pid, _)| *pid)
            .collect();
        for pid in &finished {
            self.processes.remove(pid);
        }
        finished
    }

    /// Pids of all tracked scripts.
    pub fn script_ids(&self) -> Vec<u32> {
        self.processes.keys().copied().collect()
    }
}

impl Drop for ScriptManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
