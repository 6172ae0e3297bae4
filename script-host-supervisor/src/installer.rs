//! Dependency installation through a helper script.
//!
//! The helper (by default `npmManager.js` in the scripts directory) is
//! spawned like any other script, asked to `installIfNeeded(target)` over
//! its message channel, and answers with a single
//! `installIfNeededCallback` event. The result is delivered exactly once,
//! then the helper is told to `quit`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use script_host_config::ScriptHostConfig;
use script_host_ipc::{ChannelError, Message, MessageChannel, control, events};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot};

use crate::error::{InstallError, SupervisorError};
use crate::process::{SpawnedScript, spawn_with_channel};

/// How long the helper gets to exit on its own after `quit` or a kill.
const HELPER_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Runs the dependency-installer helper.
#[derive(Debug, Clone)]
pub struct Installer {
    helper_script: PathBuf,
    interpreter: Option<String>,
    timeout_ms: u64,
}

impl Installer {
    /// Build an installer from the `installer` section of `config`.
    pub fn new(config: &ScriptHostConfig) -> Self {
        let helper_script = config.installer.helper_script.clone();
        let interpreter = config.interpreter_for(&helper_script).map(str::to_string);
        Self {
            helper_script,
            interpreter,
            timeout_ms: config.installer.timeout_ms,
        }
    }

    /// Path of the helper script that performs the install.
    pub fn helper_script(&self) -> &Path {
        &self.helper_script
    }

    /// How long the helper has to report a result.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Ensure the dependencies of `target` are installed.
    ///
    /// Resolves with whatever the helper reported (single argument
    /// unwrapped, otherwise the argument list).
    ///
    /// # Errors
    /// [`InstallError::Timeout`] when the helper does not answer within the
    /// configured deadline (the helper is killed), and
    /// [`InstallError::HelperExited`] when it goes away without answering.
    pub async fn install(&self, target: &Path) -> Result<Value, InstallError> {
        let (tx, rx) = oneshot::channel();
        self.run(target, move |result| {
            let _ = tx.send(result);
        })
        .await;
        rx.await.unwrap_or(Err(InstallError::HelperExited))
    }

    /// Drive one helper run, invoking `deliver` exactly once.
    async fn run<F>(&self, target: &Path, deliver: F)
    where
        F: FnOnce(Result<Value, InstallError>),
    {
        let spawned = match spawn_with_channel(&self.helper_script, self.interpreter.as_deref()) {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!(
                    "Failed to start installer helper {}: {e}",
                    self.helper_script.display()
                );
                deliver(Err(e.into()));
                return;
            }
        };
        let SpawnedScript {
            mut child,
            pid,
            mut channel,
            stdout,
            stderr,
        } = spawned;
        forward_helper_output(pid, stdout, stderr);

        let Some(mut incoming) = channel.take_incoming() else {
            deliver(Err(SupervisorError::StdioCapture("message channel").into()));
            reap(&mut child, pid, true).await;
            return;
        };

        log::info!(
            "Installer helper {pid} checking dependencies of {}",
            target.display()
        );
        let request = Message::control(
            control::INSTALL_IF_NEEDED,
            vec![json!(target.to_string_lossy())],
        );
        if let Err(e) = channel.send(&request).await {
            log::warn!("Failed to send install request to helper {pid}: {e}");
            deliver(Err(request_error(e)));
            reap(&mut child, pid, true).await;
            return;
        }

        let outcome = tokio::time::timeout(self.timeout(), wait_for_result(&mut incoming)).await;
        let kill = match outcome {
            Ok(Some(result)) => {
                log::info!("Installer helper {pid} finished");
                deliver(Ok(result));
                send_quit(&channel, pid).await;
                false
            }
            Ok(None) => {
                log::warn!("Installer helper {pid} closed its channel without a result");
                deliver(Err(InstallError::HelperExited));
                false
            }
            Err(_) => {
                log::error!(
                    "Installer helper {pid} gave no result within {}ms",
                    self.timeout_ms
                );
                deliver(Err(InstallError::Timeout {
                    timeout_ms: self.timeout_ms,
                }));
                true
            }
        };

        // Nothing follows quit; the helper sees EOF after it.
        let _ = channel.disconnect().await;
        reap(&mut child, pid, kill).await;
    }
}

/// Callback form of [`Installer::install`].
///
/// Runs on the current Tokio runtime; `callback` is invoked exactly once,
/// immediately if no runtime is available.
pub fn start_npm_script<F>(config: &ScriptHostConfig, target: &Path, callback: F)
where
    F: FnOnce(Result<Value, InstallError>) + Send + 'static,
{
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            callback(Err(SupervisorError::NoRuntime.into()));
            return;
        }
    };

    let installer = Installer::new(config);
    let target = target.to_path_buf();
    runtime.spawn(async move {
        installer.run(&target, callback).await;
    });
}

/// A helper that already went away is reported as such, not as a send failure.
fn request_error(e: ChannelError) -> InstallError {
    let peer_gone = match &e {
        ChannelError::Disconnected => true,
        ChannelError::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
        ),
        _ => false,
    };
    if peer_gone {
        InstallError::HelperExited
    } else {
        InstallError::Request(e)
    }
}

/// Wait for the install result event, ignoring anything else.
async fn wait_for_result(incoming: &mut mpsc::UnboundedReceiver<Message>) -> Option<Value> {
    while let Some(msg) = incoming.recv().await {
        match msg {
            Message::Event(event) if event.name == events::INSTALL_RESULT => {
                return Some(event.into_payload());
            }
            other => log::debug!("Installer helper sent unrelated '{}'", other.name()),
        }
    }
    None
}

async fn send_quit(channel: &MessageChannel, pid: u32) {
    if let Err(e) = channel
        .send(&Message::control(control::QUIT, Vec::new()))
        .await
    {
        log::warn!("Failed to send quit to installer helper {pid}: {e}");
    }
}

/// Wait for the helper to exit, killing it first when `kill` is set or when
/// it outstays [`HELPER_EXIT_GRACE`].
async fn reap(child: &mut Child, pid: u32, kill: bool) {
    if kill && let Err(e) = child.start_kill() {
        log::warn!("Failed to kill installer helper {pid}: {e}");
    }
    match tokio::time::timeout(HELPER_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => log::debug!("Installer helper {pid} exited: {status}"),
        Ok(Err(e)) => log::warn!("Failed to wait for installer helper {pid}: {e}"),
        Err(_) => {
            log::warn!("Installer helper {pid} did not exit; killing it");
            let _ = child.kill().await;
        }
    }
}

/// Forward helper stderr to `warn` and stdout to `debug`, line by line.
fn forward_helper_output(pid: u32, stdout: ChildStdout, stderr: ChildStderr) {
    tokio::spawn(async move {
        for_each_line(stderr, |line| log::warn!("[installer {pid} stderr] {line}")).await;
    });
    tokio::spawn(async move {
        for_each_line(stdout, |line| log::debug!("[installer {pid}] {line}")).await;
    });
}

/// Read `reader` to EOF, passing each non-blank line, lossily decoded, to `f`.
async fn for_each_line<R, F>(reader: R, mut f: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() {
                    f(line);
                }
            }
        }
    }
}
