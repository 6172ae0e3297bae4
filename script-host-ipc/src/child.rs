//! Script-side end of the message channel.
//!
//! Rust scripts launched by the host use [`ChildChannel::from_env`] to claim
//! the inherited descriptor, then [`ChildChannel::emit`] custom events and
//! [`ChildChannel::recv`] host events and control signals.

use std::os::fd::{FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::channel::CHANNEL_FD_ENV;
use crate::error::ChannelError;
use crate::protocol::{Decoded, Message, decode_line, encode_message};

/// Guards against two owners of the inherited descriptor.
static CLAIMED: AtomicBool = AtomicBool::new(false);

/// A script's connection back to its host.
pub struct ChildChannel {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl ChildChannel {
    /// Claim the channel descriptor announced in [`CHANNEL_FD_ENV`].
    ///
    /// Must be called from within a Tokio runtime, at most once per process.
    pub fn from_env() -> Result<Self, ChannelError> {
        let raw = std::env::var(CHANNEL_FD_ENV)
            .map_err(|_| ChannelError::MissingDescriptor(CHANNEL_FD_ENV))?;
        let fd: RawFd = raw
            .trim()
            .parse()
            .map_err(|_| ChannelError::InvalidDescriptor(raw.clone()))?;
        if fd < 0 {
            return Err(ChannelError::InvalidDescriptor(raw));
        }
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::AlreadyClaimed);
        }

        // SAFETY: the host placed an open socket at `fd` before exec and the
        // CLAIMED flag ensures this process takes ownership of it only once.
        let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
        stream.set_nonblocking(true)?;
        Ok(Self::from_stream(UnixStream::from_std(stream)?))
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    /// Emit a custom event to the host.
    pub async fn emit(&mut self, name: &str, args: Vec<Value>) -> Result<(), ChannelError> {
        let line = encode_message(&Message::event(name, args))?;
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Wait for the next message from the host, in the order it was sent.
    ///
    /// Yields both host events and control signals; lines that are not
    /// channel messages are skipped. Returns `Ok(None)` once the host has
    /// disconnected.
    pub async fn recv(&mut self) -> Result<Option<Message>, ChannelError> {
        while let Some(line) = self.lines.next_line().await? {
            match decode_line(line.trim()) {
                Decoded::Message(msg) => return Ok(Some(msg)),
                Decoded::Unrecognized { .. } => {
                    log::debug!("Skipping unrecognized line from host");
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageChannel;
    use crate::protocol::control;
    use serde_json::json;

    #[tokio::test]
    async fn test_child_and_host_exchange_messages() {
        let (host, child) = UnixStream::pair().unwrap();
        let mut host = MessageChannel::from_stream(host);
        let mut incoming = host.take_incoming().unwrap();
        let mut child = ChildChannel::from_stream(child);

        child.emit("ready", vec![json!("v1")]).await.unwrap();
        assert_eq!(
            incoming.recv().await,
            Some(Message::event("ready", vec![json!("v1")]))
        );

        host.send(&Message::control(control::QUIT, vec![]))
            .await
            .unwrap();
        let received = child.recv().await.unwrap().unwrap();
        assert_eq!(received, Message::control(control::QUIT, vec![]));

        host.disconnect().await.unwrap();
        assert!(child.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_host_events_arrive_before_later_controls() {
        let (host, child) = UnixStream::pair().unwrap();
        let host = MessageChannel::from_stream(host);
        let mut child = ChildChannel::from_stream(child);

        host.send(&Message::event("greet", vec![json!("hi")]))
            .await
            .unwrap();
        host.send(&Message::control(control::QUIT, vec![]))
            .await
            .unwrap();

        match child.recv().await.unwrap() {
            Some(Message::Event(event)) => {
                assert_eq!(event.name, "greet");
                assert_eq!(event.args, vec![json!("hi")]);
            }
            other => panic!("Expected greet event, got {:?}", other),
        }
        match child.recv().await.unwrap() {
            Some(Message::Control(ctrl)) => assert_eq!(ctrl.name, control::QUIT),
            other => panic!("Expected quit control, got {:?}", other),
        }
    }

    #[test]
    fn test_from_env_requires_descriptor() {
        // SAFETY: test-local mutation; no other test in this crate reads it.
        unsafe { std::env::remove_var(CHANNEL_FD_ENV) };
        assert!(matches!(
            ChildChannel::from_env(),
            Err(ChannelError::MissingDescriptor(_))
        ));
    }
}
