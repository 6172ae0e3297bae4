//! Host-side end of the message channel.
//!
//! A [`MessageChannel`] wraps one end of a Unix socket pair. The other end
//! ([`ChildEnd`]) is handed to the child process as descriptor
//! [`CHILD_CHANNEL_FD`], announced through [`CHANNEL_FD_ENV`].
//!
//! A background reader task decodes incoming lines. Tagged channel messages
//! are forwarded to an mpsc channel retrievable once via
//! [`MessageChannel::take_incoming`]; everything else is logged and dropped.

use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::ChannelError;
use crate::protocol::{Decoded, Message, decode_line, encode_message};

/// Environment variable telling the child which descriptor carries the channel.
pub const CHANNEL_FD_ENV: &str = "SCRIPT_HOST_CHANNEL_FD";

/// Descriptor number the channel occupies inside the child.
pub const CHILD_CHANNEL_FD: RawFd = 3;

/// The child's end of a freshly created channel, prior to spawn.
///
/// Attach it to the command with [`ChildEnd::attach`], spawn, then drop it so
/// the host holds no copy of the child's descriptor. Otherwise the host would
/// never observe EOF when the child goes away.
#[derive(Debug)]
pub struct ChildEnd {
    stream: std::os::unix::net::UnixStream,
}

impl ChildEnd {
    /// Arrange for this end to appear as [`CHILD_CHANNEL_FD`] in the child.
    pub fn attach(&self, cmd: &mut tokio::process::Command) {
        let fd = self.stream.as_raw_fd();
        cmd.env(CHANNEL_FD_ENV, CHILD_CHANNEL_FD.to_string());

        // SAFETY: the closure runs in the forked child before exec and only
        // calls async-signal-safe functions (dup2, fcntl). `fd` stays open in
        // the parent until after spawn because `self` outlives the call.
        unsafe {
            cmd.pre_exec(move || {
                if fd == CHILD_CHANNEL_FD {
                    // dup2 onto itself is a no-op and keeps FD_CLOEXEC set.
                    let flags = libc::fcntl(fd, libc::F_GETFD);
                    if flags < 0
                        || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if libc::dup2(fd, CHILD_CHANNEL_FD) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
}

/// Host side of the private, ordered, bidirectional channel to one child.
pub struct MessageChannel {
    /// Writer half; `None` once disconnected.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Cleared on local disconnect or when the peer closes its end.
    connected: Arc<AtomicBool>,
    /// Handed out exactly once via `take_incoming()`.
    incoming_rx: Option<mpsc::UnboundedReceiver<Message>>,
    /// Background line reader.
    reader_task: JoinHandle<()>,
}

impl MessageChannel {
    /// Create a connected socket pair: the host-side channel and the end to
    /// hand to the child.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn pair() -> Result<(Self, ChildEnd), ChannelError> {
        let (host, child) = std::os::unix::net::UnixStream::pair()?;
        host.set_nonblocking(true)?;
        let host = UnixStream::from_std(host)?;
        Ok((Self::from_stream(host), ChildEnd { stream: child }))
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_messages(
            read_half,
            incoming_tx,
            Arc::clone(&connected),
        ));

        Self {
            writer: Mutex::new(Some(write_half)),
            connected,
            incoming_rx: Some(incoming_rx),
            reader_task,
        }
    }

    /// Take the receiver for incoming messages.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.incoming_rx.take()
    }

    /// Whether the channel is still usable for sending.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Send one message to the peer.
    pub async fn send(&self, msg: &Message) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Disconnected);
        }
        let line = encode_message(msg)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ChannelError::Disconnected)?;
        writer.write_all(format!("{line}\n").as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Sever the channel.
    ///
    /// Returns `Ok(true)` if this call severed it, `Ok(false)` if it was
    /// already disconnected. A peer that has already gone away is not an error.
    pub async fn disconnect(&self) -> Result<bool, ChannelError> {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        let writer = self.writer.lock().await.take();
        self.reader_task.abort();

        if let Some(mut writer) = writer {
            match writer.shutdown().await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
        Ok(was_connected)
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Reader loop: decode lines until EOF, forwarding channel messages.
async fn read_messages(
    read_half: OwnedReadHalf,
    incoming_tx: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match decode_line(trimmed) {
                    Decoded::Message(msg) => {
                        if incoming_tx.send(msg).is_err() {
                            // Receiver dropped.
                            break;
                        }
                    }
                    Decoded::Unrecognized { reason, .. } => {
                        log::debug!("Ignoring unrecognized channel line: {reason}");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("Error reading from message channel: {e}");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
