//! Wire format for the host ↔ script message channel.
//!
//! Each message is one JSON object per line. Channel messages carry a
//! `"channel": "script-host"` tag so they can be told apart from anything
//! else a script might write to the descriptor:
//!
//! ```text
//! {"channel":"script-host","kind":"event","name":"progress","args":[42]}
//! {"channel":"script-host","kind":"control","name":"kill","args":[]}
//! ```
//!
//! Decoding never fails: lines that are not tagged channel messages, or that
//! do not match the message shape, come back as [`Decoded::Unrecognized`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// Tag value identifying channel-protocol messages.
pub const CHANNEL_TAG: &str = "script-host";

/// Field carrying [`CHANNEL_TAG`].
const TAG_FIELD: &str = "channel";

/// Control message names sent from the host to a script.
pub mod control {
    /// Ask the script to terminate itself.
    pub const TERMINATE: &str = "kill";
    /// Ask a helper script to exit once it has delivered its result.
    pub const QUIT: &str = "quit";
    /// Ask the installer helper to install dependencies for a target path.
    pub const INSTALL_IF_NEEDED: &str = "installIfNeeded";
}

/// Event names with meaning to the host itself.
pub mod events {
    /// Result reported by the installer helper.
    pub const INSTALL_RESULT: &str = "installIfNeededCallback";
}

/// A custom event emitted by a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Raw event name as chosen by the script.
    pub name: String,
    /// Ordered event arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl EventMessage {
    /// Collapse the arguments into a single sink payload.
    ///
    /// Exactly one argument is delivered unwrapped; any other count is
    /// delivered as the ordered argument array. Consumers rely on this.
    pub fn into_payload(self) -> Value {
        let mut args = self.args;
        if args.len() == 1 {
            args.remove(0)
        } else {
            Value::Array(args)
        }
    }
}

/// A control signal sent from the host to a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Control name, see [`control`].
    pub name: String,
    /// Ordered control arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A structured message travelling over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Script → host custom event.
    Event(EventMessage),
    /// Host → script control signal.
    Control(ControlMessage),
}

impl Message {
    /// Build an event message.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Message::Event(EventMessage {
            name: name.into(),
            args,
        })
    }

    /// Build a control message.
    pub fn control(name: impl Into<String>, args: Vec<Value>) -> Self {
        Message::Control(ControlMessage {
            name: name.into(),
            args,
        })
    }

    /// Name of the event or control signal.
    pub fn name(&self) -> &str {
        match self {
            Message::Event(e) => &e.name,
            Message::Control(c) => &c.name,
        }
    }
}

/// Outcome of decoding one line read from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed channel message.
    Message(Message),
    /// Anything else; carried for diagnostics only.
    Unrecognized {
        /// The offending line.
        line: String,
        /// Why it was not accepted.
        reason: String,
    },
}

/// Decode a single line read from the channel.
pub fn decode_line(line: &str) -> Decoded {
    let unrecognized = |reason: String| Decoded::Unrecognized {
        line: line.to_string(),
        reason,
    };

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return unrecognized(format!("not JSON: {e}")),
    };

    match value.get(TAG_FIELD).and_then(Value::as_str) {
        Some(CHANNEL_TAG) => {}
        Some(other) => return unrecognized(format!("foreign channel tag '{other}'")),
        None => return unrecognized("missing channel tag".to_string()),
    }

    match serde_json::from_value::<Message>(value) {
        Ok(msg) => Decoded::Message(msg),
        Err(e) => unrecognized(format!("bad message shape: {e}")),
    }
}

/// Encode a message as a single JSON line (without the trailing newline).
pub fn encode_message(msg: &Message) -> Result<String, ChannelError> {
    let mut value = serde_json::to_value(msg)?;
    if let Value::Object(map) = &mut value {
        map.insert(TAG_FIELD.to_string(), Value::String(CHANNEL_TAG.to_string()));
    }
    Ok(serde_json::to_string(&value)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
