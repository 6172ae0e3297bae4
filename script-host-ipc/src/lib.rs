//! script-host-ipc: the private message channel between the script host and
//! each child script.
//!
//! - [`protocol`] - JSON-lines wire format, tagged-union decode, control names
//! - [`channel`] - host-side [`MessageChannel`] and the descriptor hand-off
//! - [`child`] - script-side [`ChildChannel`]
//!
//! The channel is a Unix socket pair; the child end is inherited as
//! descriptor 3. Unix only.

pub mod channel;
pub mod child;
pub mod error;
pub mod protocol;

pub use channel::{CHANNEL_FD_ENV, CHILD_CHANNEL_FD, ChildEnd, MessageChannel};
pub use child::ChildChannel;
pub use error::ChannelError;
pub use protocol::{
    CHANNEL_TAG, ControlMessage, Decoded, EventMessage, Message, control, decode_line,
    encode_message, events,
};
