//! The outbound event sink.
//!
//! [`EventSink`] is the host's transport toward the editor. The supervisor
//! only ever calls it; delivery is fire-and-forget.

use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Receives routed script events.
///
/// Implementations are shared between all supervised processes and must
/// tolerate interleaved calls from different processes.
pub trait EventSink: Send + Sync {
    /// Deliver a named event with its payload.
    fn emit(&self, name: &str, payload: Value);

    /// Deliver one line of script console output.
    ///
    /// The default forwards it as an `event_name` event carrying
    /// `{"pid": pid, "message": line}`.
    fn script_log(&self, event_name: &str, pid: u32, line: &str) {
        self.emit(event_name, json!({ "pid": pid, "message": line }));
    }
}

/// One event as delivered to a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkEvent {
    /// Event name.
    pub name: String,
    /// Event payload.
    pub payload: Value,
}

/// Sink that forwards every event onto an unbounded mpsc channel.
///
/// Used by the CLI to print events and by tests to observe them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, name: &str, payload: Value) {
        // Receiver gone means nobody is listening; events are fire-and-forget.
        let _ = self.tx.send(SinkEvent {
            name: name.to_string(),
            payload,
        });
    }
}
