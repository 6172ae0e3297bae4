//! Async bodies of the `run` and `install` subcommands.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use script_host_config::ScriptHostConfig;
use script_host_supervisor::{ChannelSink, Installer, ProcessHandle, Supervisor, stop_script};

use crate::output::format_event;

/// How long a stopped script may keep running before it is killed.
const KILL_AFTER_STOP: Duration = Duration::from_secs(3);

/// Run `script` until it ends, printing every sink event as a JSON line.
///
/// Returns the process exit code for the binary: `1` when the script
/// reported an application error, `0` otherwise.
pub async fn run_script(
    config: ScriptHostConfig,
    script: &str,
    base_path: Option<&Path>,
    stop_after: Option<Duration>,
) -> anyhow::Result<i32> {
    let events = config.events.clone();
    let supervisor = Supervisor::new(config);
    let (sink, mut rx) = ChannelSink::new();

    let handle = supervisor
        .start_script(script, Arc::new(sink), base_path)
        .with_context(|| format!("Failed to start script '{script}'"))?;
    log::info!("Running script '{script}' as pid {}", handle.pid());

    let stop_timer = async {
        match stop_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop_timer);

    let mut stop_requested = false;
    let mut application_error = false;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                writeln!(stdout, "{}", format_event(&event)?)?;
                stdout.flush()?;
                if event.name == events.script_error {
                    application_error = true;
                }
                if event.name == events.script_end {
                    break;
                }
            }
            _ = &mut stop_timer, if !stop_requested => {
                log::info!("Stop timer elapsed");
                stop_requested = true;
                request_stop(&handle);
            }
            _ = tokio::signal::ctrl_c(), if !stop_requested => {
                log::info!("Interrupted");
                stop_requested = true;
                request_stop(&handle);
            }
        }
    }

    Ok(if application_error { 1 } else { 0 })
}

/// Ask the script to stop, killing it if it outlives the request.
fn request_stop(handle: &ProcessHandle) {
    let pid = handle.pid();
    let fallback = handle.clone();
    stop_script(handle, move |result| match result {
        Ok(pid) => {
            log::info!("Stop requested for script {pid}");
            tokio::spawn(async move {
                tokio::time::sleep(KILL_AFTER_STOP).await;
                if fallback.is_running() {
                    log::warn!("Script {pid} ignored the stop request; killing it");
                    let _ = fallback.kill();
                }
            });
        }
        Err(e) => {
            log::warn!("Failed to stop script {pid}: {e}");
            let _ = fallback.kill();
        }
    });
}

/// Run the dependency installer for `target` and print its result.
pub async fn run_install(config: ScriptHostConfig, target: &Path) -> anyhow::Result<i32> {
    let installer = Installer::new(&config);
    log::info!(
        "Installing dependencies of {} via {}",
        target.display(),
        installer.helper_script().display()
    );
    let result = installer
        .install(target)
        .await
        .with_context(|| format!("Dependency installation failed for {}", target.display()))?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(0)
}
