//! Typed errors for the message channel.

use thiserror::Error;

/// Errors produced by either end of the message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has already been disconnected (locally or by the peer).
    #[error("channel is disconnected")]
    Disconnected,

    /// Reading or writing the underlying socket failed.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be serialized.
    #[error("failed to encode channel message: {0}")]
    Encode(#[from] serde_json::Error),

    /// The child-side channel descriptor was not provided by the host.
    #[error("no channel descriptor in environment variable {0}")]
    MissingDescriptor(&'static str),

    /// The environment variable did not contain a usable descriptor number.
    #[error("invalid channel descriptor '{0}'")]
    InvalidDescriptor(String),

    /// [`crate::ChildChannel::from_env`] was called more than once.
    #[error("the inherited channel descriptor has already been claimed")]
    AlreadyClaimed,
}
