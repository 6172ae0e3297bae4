//! Supervision of a single script subprocess.
//!
//! [`Supervisor::start_script`] spawns a script with captured stdout/stderr
//! and a private [`MessageChannel`], then hands everything to one background
//! supervision task. That task is the only place where per-process state
//! changes, so channel events, stdout lines, stderr fragments and the exit
//! notification are never interleaved for a given process.
//!
//! Routing performed by the task:
//!
//! - channel events → `sink.emit(routed_event_name(pid, name), payload)`
//! - stdout lines → `sink.script_log(events.script_log, pid, line)`
//! - stderr fragments → the handle's error buffer
//! - exit status 1 → `sink.emit(events.script_error, buffered stderr)`
//! - any exit → `sink.emit(events.script_end, pid)`

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use script_host_config::{EventNames, ScriptHostConfig};
use script_host_ipc::{EventMessage, Message, MessageChannel, control};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Notify, mpsc, watch};

use crate::error::SupervisorError;
use crate::naming::routed_event_name;
use crate::sink::EventSink;
use crate::stream::{ErrorAccumulator, Utf8Fragments};

/// The one exit status reported as a script application error.
///
/// Any other exit code, and termination by signal, only produces the
/// "script ended" event.
pub const APPLICATION_ERROR_EXIT_CODE: i32 = 1;

/// Size of a single stderr read.
const STDERR_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// A freshly spawned script with its channel and captured streams.
pub(crate) struct SpawnedScript {
    pub child: Child,
    pub pid: u32,
    pub channel: MessageChannel,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn `script_path` (through `interpreter` when given) with piped
/// stdout/stderr, no stdin, and a message channel on the child's fd 3.
pub(crate) fn spawn_with_channel(
    script_path: &Path,
    interpreter: Option<&str>,
) -> Result<SpawnedScript, SupervisorError> {
    let (channel, child_end) = MessageChannel::pair()?;

    let mut cmd = match interpreter {
        Some(interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.arg(script_path);
            cmd
        }
        None => Command::new(script_path),
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    child_end.attach(&mut cmd);

    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        path: script_path.to_path_buf(),
        source,
    })?;
    // Close our copy of the child's end so its exit is observable as EOF.
    drop(child_end);

    let Some(pid) = child.id() else {
        let _ = child.start_kill();
        return Err(SupervisorError::StdioCapture("process id"));
    };
    let Some(stdout) = child.stdout.take() else {
        let _ = child.start_kill();
        return Err(SupervisorError::StdioCapture("stdout"));
    };
    let Some(stderr) = child.stderr.take() else {
        let _ = child.start_kill();
        return Err(SupervisorError::StdioCapture("stderr"));
    };

    Ok(SpawnedScript {
        child,
        pid,
        channel,
        stdout,
        stderr,
    })
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Starts scripts and wires them to an [`EventSink`].
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: Arc<ScriptHostConfig>,
}

impl Supervisor {
    /// Create a supervisor using `config` for paths, event names and timing.
    pub fn new(config: ScriptHostConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The configuration this supervisor was created with.
    pub fn config(&self) -> &ScriptHostConfig {
        &self.config
    }

    /// Resolve `name` against `base_path`, or the configured default base.
    ///
    /// Existence is not checked; a missing script fails at spawn.
    pub fn resolve_script_path(&self, name: &str, base_path: Option<&Path>) -> PathBuf {
        base_path
            .unwrap_or(&self.config.default_base_path)
            .join(name)
    }

    /// Spawn `name` as a supervised child process.
    ///
    /// Returns as soon as the process is spawned and its observers are wired;
    /// the script itself runs asynchronously. Everything that happens after
    /// spawn is reported through `sink`, never through this result.
    ///
    /// # Errors
    /// [`SupervisorError::NoRuntime`] outside a Tokio runtime,
    /// [`SupervisorError::Spawn`] when the process cannot be created.
    pub fn start_script(
        &self,
        name: &str,
        sink: Arc<dyn EventSink>,
        base_path: Option<&Path>,
    ) -> Result<ProcessHandle, SupervisorError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SupervisorError::NoRuntime)?;

        let script_path = self.resolve_script_path(name, base_path);
        let interpreter = self.config.interpreter_for(&script_path);
        log::info!(
            "Starting script {} (interpreter: {})",
            script_path.display(),
            interpreter.unwrap_or("none")
        );

        let SpawnedScript {
            child,
            pid,
            mut channel,
            stdout,
            stderr,
        } = spawn_with_channel(&script_path, interpreter)?;

        let incoming = channel
            .take_incoming()
            .ok_or(SupervisorError::StdioCapture("message channel"))?;

        let (running, _) = watch::channel(true);
        let inner = Arc::new(HandleInner {
            pid,
            channel,
            running,
            errors: Mutex::new(ErrorAccumulator::default()),
            kill_requested: Notify::new(),
            stop_grace: Duration::from_millis(self.config.stop_grace_ms),
        });

        let router = Router {
            pid,
            sink,
            events: self.config.events.clone(),
            inner: Arc::clone(&inner),
        };
        let streams = ChildStreams::new(incoming, stdout, stderr);
        let drain_timeout = Duration::from_millis(self.config.drain_timeout_ms);
        runtime.spawn(supervise(child, streams, router, drain_timeout));

        log::info!("Script {} started with pid {pid}", script_path.display());
        Ok(ProcessHandle { inner })
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct HandleInner {
    pid: u32,
    channel: MessageChannel,
    /// `true` from spawn until the exit has been observed.
    running: watch::Sender<bool>,
    errors: Mutex<ErrorAccumulator>,
    kill_requested: Notify,
    stop_grace: Duration,
}

/// Handle to one supervised script process.
///
/// Cheap to clone; all clones refer to the same process. A handle is never
/// reused: every spawn yields a new one.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid())
            .field("running", &self.is_running())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ProcessHandle {
    /// OS process id, fixed for the lifetime of the handle.
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Whether the process exit has not been observed yet.
    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Whether the message channel to the process is still open.
    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_connected()
    }

    /// Snapshot of the stderr text accumulated since the last flush.
    pub fn accumulated_error_text(&self) -> String {
        self.inner.errors.lock().as_str().to_string()
    }

    /// Wait until the process exit has been observed and reported.
    pub async fn wait(&self) {
        let mut rx = self.inner.running.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot close.
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Send a host-originated custom event to the script.
    pub async fn send_event(&self, name: &str, args: Vec<Value>) -> Result<(), SupervisorError> {
        if !self.is_connected() {
            return Err(SupervisorError::NotConnected { pid: self.pid() });
        }
        self.inner.channel.send(&Message::event(name, args)).await?;
        Ok(())
    }

    /// Ask the script to terminate, then sever the channel.
    ///
    /// Sends the terminate control message, waits the configured grace
    /// period on a timer, then disconnects unconditionally. This is a
    /// best-effort shutdown: the grace period does not guarantee the script
    /// has finished its cleanup. The exit itself is reported independently
    /// through the sink and may arrive before or after this returns.
    ///
    /// # Errors
    /// [`SupervisorError::NotConnected`] if the channel is already closed (no
    /// message is sent), [`SupervisorError::Disconnect`] if severing fails.
    pub async fn stop(&self) -> Result<u32, SupervisorError> {
        let pid = self.pid();
        if !self.is_connected() {
            return Err(SupervisorError::NotConnected { pid });
        }

        let terminate = Message::control(control::TERMINATE, Vec::new());
        if let Err(e) = self.inner.channel.send(&terminate).await {
            log::warn!("Failed to send terminate request to script {pid}: {e}");
        }

        tokio::time::sleep(self.inner.stop_grace).await;

        match self.inner.channel.disconnect().await {
            Ok(_) => {
                log::info!("Script {pid} disconnected");
                Ok(pid)
            }
            Err(e) => Err(SupervisorError::Disconnect(e.to_string())),
        }
    }

    /// Forcibly terminate the process.
    ///
    /// # Errors
    /// [`SupervisorError::NotRunning`] if the exit was already observed.
    pub fn kill(&self) -> Result<(), SupervisorError> {
        if !self.is_running() {
            return Err(SupervisorError::NotRunning { pid: self.pid() });
        }
        self.inner.kill_requested.notify_one();
        Ok(())
    }
}

/// Callback form of [`ProcessHandle::stop`].
///
/// A handle that is no longer connected is reported to `callback`
/// immediately, on the calling thread. Otherwise the stop runs on the
/// current Tokio runtime and `callback` is invoked when it completes.
pub fn stop_script<F>(handle: &ProcessHandle, callback: F)
where
    F: FnOnce(Result<u32, SupervisorError>) + Send + 'static,
{
    if !handle.is_connected() {
        callback(Err(SupervisorError::NotConnected { pid: handle.pid() }));
        return;
    }
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            callback(Err(SupervisorError::NoRuntime));
            return;
        }
    };

    let handle = handle.clone();
    runtime.spawn(async move {
        callback(handle.stop().await);
    });
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Forward a script event to the sink under its routed name.
///
/// A single argument is delivered unwrapped, any other count as a list.
pub fn route_event(sink: &dyn EventSink, pid: u32, event: EventMessage) {
    let routed = routed_event_name(pid, &event.name);
    log::debug!("Routing event {routed}");
    sink.emit(&routed, event.into_payload());
}

/// Something observed on one of the child's streams.
#[derive(Debug)]
enum Observed {
    Event(EventMessage),
    Stdout(String),
    Stderr(String),
}

/// Per-process routing state owned by the supervision task.
struct Router {
    pid: u32,
    sink: Arc<dyn EventSink>,
    events: EventNames,
    inner: Arc<HandleInner>,
}

impl Router {
    fn dispatch(&self, observed: Observed) {
        match observed {
            Observed::Event(event) => route_event(self.sink.as_ref(), self.pid, event),
            Observed::Stdout(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    self.sink.script_log(&self.events.script_log, self.pid, line);
                }
            }
            Observed::Stderr(fragment) => self.inner.errors.lock().push_fragment(&fragment),
        }
    }

    async fn finish(&self, status: std::io::Result<ExitStatus>) {
        let pid = self.pid;
        let application_error = match &status {
            Ok(status) => {
                log::info!("Script {pid} exited: {status}");
                status.code() == Some(APPLICATION_ERROR_EXIT_CODE)
            }
            Err(e) => {
                log::error!("Failed to wait for script {pid}: {e}");
                false
            }
        };

        if application_error {
            let text = self.inner.errors.lock().take();
            log::warn!("Script {pid} reported an error: {text}");
            self.sink.emit(&self.events.script_error, Value::String(text));
        }

        self.inner.running.send_replace(false);
        if let Err(e) = self.inner.channel.disconnect().await {
            log::debug!("Channel teardown for script {pid} failed: {e}");
        }

        self.sink.emit(&self.events.script_end, json!(pid));
    }
}

// ---------------------------------------------------------------------------
// Stream multiplexing
// ---------------------------------------------------------------------------

/// The child's three inbound sources. Each becomes `None` at EOF.
struct ChildStreams {
    incoming: Option<mpsc::UnboundedReceiver<Message>>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<ChildStderr>,
    /// Bytes of the stdout line being assembled; survives cancelled reads.
    line: Vec<u8>,
    decoder: Utf8Fragments,
    buf: Vec<u8>,
}

/// Which source woke the multiplexer.
enum Step {
    Message(Option<Message>),
    Stdout(std::io::Result<usize>),
    Stderr(std::io::Result<usize>),
}

impl ChildStreams {
    fn new(
        incoming: mpsc::UnboundedReceiver<Message>,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> Self {
        Self {
            incoming: Some(incoming),
            stdout: Some(BufReader::new(stdout)),
            stderr: Some(stderr),
            line: Vec::new(),
            decoder: Utf8Fragments::default(),
            buf: vec![0; STDERR_CHUNK],
        }
    }

    fn is_drained(&self) -> bool {
        self.incoming.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }

    /// Next observation from any open source; `None` once all are closed.
    ///
    /// Cancel safe: every source future is cancel safe.
    async fn next(&mut self) -> Option<Observed> {
        loop {
            if self.is_drained() {
                return None;
            }

            let step = tokio::select! {
                msg = recv_message(self.incoming.as_mut()) => Step::Message(msg),
                n = read_line(self.stdout.as_mut(), &mut self.line) => Step::Stdout(n),
                n = read_chunk(self.stderr.as_mut(), &mut self.buf) => Step::Stderr(n),
            };

            match step {
                Step::Message(Some(Message::Event(event))) => {
                    return Some(Observed::Event(event));
                }
                Step::Message(Some(Message::Control(ctrl))) => {
                    log::debug!("Ignoring control '{}' sent by a script", ctrl.name);
                }
                Step::Message(None) => self.incoming = None,
                Step::Stdout(Ok(0)) => {
                    self.stdout = None;
                    if !self.line.is_empty() {
                        return Some(Observed::Stdout(self.take_line()));
                    }
                }
                Step::Stdout(Ok(_)) => return Some(Observed::Stdout(self.take_line())),
                Step::Stdout(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Step::Stdout(Err(e)) => {
                    log::warn!("Error reading script stdout: {e}");
                    self.stdout = None;
                }
                Step::Stderr(Ok(0)) => {
                    self.stderr = None;
                    let tail = self.decoder.finish();
                    if !tail.is_empty() {
                        return Some(Observed::Stderr(tail));
                    }
                }
                Step::Stderr(Ok(n)) => {
                    let text = self.decoder.push(&self.buf[..n]);
                    if !text.is_empty() {
                        return Some(Observed::Stderr(text));
                    }
                }
                Step::Stderr(Err(e)) => {
                    log::warn!("Error reading script stderr: {e}");
                    self.stderr = None;
                }
            }
        }
    }

    /// Decode the assembled stdout line. Invalid UTF-8 becomes U+FFFD.
    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        line
    }
}

async fn recv_message(rx: Option<&mut mpsc::UnboundedReceiver<Message>>) -> Option<Message> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Append bytes up to and including the next `\n` to `line`.
///
/// Partially read bytes stay in `line` when the future is cancelled.
async fn read_line(
    stdout: Option<&mut BufReader<ChildStdout>>,
    line: &mut Vec<u8>,
) -> std::io::Result<usize> {
    match stdout {
        Some(stdout) => stdout.read_until(b'\n', line).await,
        None => std::future::pending().await,
    }
}

async fn read_chunk(stderr: Option<&mut ChildStderr>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stderr {
        Some(stderr) => stderr.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Which event woke the supervision loop.
enum Wake {
    Observed(Option<Observed>),
    KillRequested,
    Exited(std::io::Result<ExitStatus>),
}

/// Supervision task for one process: route output until exit, drain what is
/// left (bounded by `drain_timeout`), then report the exit.
async fn supervise(
    mut child: Child,
    mut streams: ChildStreams,
    router: Router,
    drain_timeout: Duration,
) {
    let pid = router.pid;

    let status = loop {
        let wake = tokio::select! {
            biased;
            observed = streams.next(), if !streams.is_drained() => Wake::Observed(observed),
            _ = router.inner.kill_requested.notified() => Wake::KillRequested,
            status = child.wait() => Wake::Exited(status),
        };

        match wake {
            Wake::Observed(Some(observed)) => router.dispatch(observed),
            Wake::Observed(None) => {}
            Wake::KillRequested => {
                log::info!("Killing script {pid}");
                if let Err(e) = child.start_kill() {
                    log::warn!("Failed to kill script {pid}: {e}");
                }
            }
            Wake::Exited(status) => break status,
        }
    };

    let drain = async {
        while let Some(observed) = streams.next().await {
            router.dispatch(observed);
        }
    };
    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        log::warn!(
            "Script {pid} output still open {}ms after exit; dropping the rest",
            drain_timeout.as_millis()
        );
    }

    router.finish(status).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
