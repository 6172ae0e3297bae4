//! Helpers for turning raw child stream reads into text.

/// Strip line terminators (`\r`, `\n`) from both ends of a fragment.
///
/// Interior and other whitespace is kept, so `"Error: "` followed by
/// `"bad input"` still reads `"Error: bad input"` once concatenated.
pub fn trim_line_terminators(fragment: &str) -> &str {
    fragment.trim_matches(|c| c == '\r' || c == '\n')
}

/// Incremental UTF-8 decoder for arbitrarily split byte reads.
///
/// A multi-byte character cut in half by a read boundary is held back until
/// the rest arrives; genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Fragments {
    pending: Vec<u8>,
}

impl Utf8Fragments {
    /// Feed one read's bytes, returning whatever text is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete trailing sequence: wait for more bytes.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush any held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

/// Accumulates stderr fragments until they are flushed on exit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorAccumulator {
    text: String,
}

impl ErrorAccumulator {
    /// Append one fragment after trimming its line terminators.
    ///
    /// Fragments that are empty after trimming (e.g. a lone newline) are
    /// dropped.
    pub fn push_fragment(&mut self, fragment: &str) {
        let trimmed = trim_line_terminators(fragment);
        if !trimmed.is_empty() {
            self.text.push_str(trimmed);
        }
    }

    /// Current accumulated text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Take the accumulated text, leaving the buffer empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}
