//! Process-scoped event names.
//!
//! Scripts pick their own event names, so two scripts may both emit
//! `"progress"`. The host sees `"progress@1234"` and `"progress@5678"`.

/// Separator between the raw event name and the process id.
const SEPARATOR: char = '@';

/// Derive the sink event name for `raw` emitted by process `pid`.
///
/// The pid suffix is digits only, so the last separator always splits the
/// pair unambiguously even when `raw` itself contains the separator.
pub fn routed_event_name(pid: u32, raw: &str) -> String {
    format!("{raw}{SEPARATOR}{pid}")
}

/// Split a routed name back into `(pid, raw)`.
///
/// Returns `None` for names that were not produced by [`routed_event_name`].
pub fn parse_routed_event_name(routed: &str) -> Option<(u32, &str)> {
    let (raw, pid) = routed.rsplit_once(SEPARATOR)?;
    if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((pid.parse().ok()?, raw))
}
