//! JSON-lines rendering of sink events for the `run` subcommand.

use serde_json::{Map, Value};

use script_host_supervisor::{SinkEvent, parse_routed_event_name};

/// Render one sink event as a single JSON line (without the newline).
///
/// Routed script events additionally carry the originating `pid` and the
/// script's own `name`, so consumers need not parse the routed form.
pub fn format_event(event: &SinkEvent) -> serde_json::Result<String> {
    let mut line = Map::new();
    line.insert("event".to_string(), Value::String(event.name.clone()));
    if let Some((pid, raw)) = parse_routed_event_name(&event.name) {
        line.insert("pid".to_string(), Value::from(pid));
        line.insert("name".to_string(), Value::String(raw.to_string()));
    }
    line.insert("payload".to_string(), event.payload.clone());
    serde_json::to_string(&Value::Object(line))
}
