//! SSE (Server-Sent Events) stream normalizer.
//!
//! Upstream bytes arrive in arbitrary chunks: an event may be split mid-line
//! or mid-separator, and several events may be merged into one chunk.
//! [`SseNormalizer`] reassembles discrete events regardless of chunk
//! boundaries, rewrites model fields inside JSON `data:` payloads, and
//! guarantees that every completed stream ends with exactly one
//! `data: [DONE]` event.
//!
//! The state machine is I/O-free: `feed()` accepts one chunk and returns the
//! events it completed, `finish()` flushes the tail and the sentinel. Tests
//! can drive it directly with any chunking.

use serde_json::Value;

use crate::proxy::rewrite::rewrite_model_fields;

/// Sentinel payload marking the logical end of a streamed response.
pub const DONE: &str = "[DONE]";

/// Stateful normalizer for one streaming response.
///
/// Only the currently-undelimited tail is buffered between chunks; completed
/// events are emitted immediately, in input order.
pub struct SseNormalizer {
    /// Unconsumed decoded text; may span partial lines or partial events.
    buffer: String,
    /// Bytes held back from a chunk that ended mid UTF-8 sequence.
    partial: Vec<u8>,
    saw_done: bool,
    events_forwarded: u64,
    client_model: Option<String>,
}

impl SseNormalizer {
    /// Create a normalizer. `client_model` is the model name the caller
    /// declared; `None` disables payload rewriting.
    pub fn new(client_model: Option<String>) -> Self {
        Self {
            buffer: String::new(),
            partial: Vec::new(),
            saw_done: false,
            events_forwarded: 0,
            client_model,
        }
    }

    /// Feed one upstream chunk. Returns zero or more complete normalized
    /// events, each already carrying its blank-line terminator.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);
        self.drain()
    }

    /// Flush any trailing partial event and guarantee the sentinel.
    ///
    /// A non-empty leftover buffer is treated as a final event (the missing
    /// separator is synthesized). If the upstream never sent `[DONE]`, one is
    /// appended so the downstream client always sees a terminated stream.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.partial.is_empty() {
            let tail = std::mem::take(&mut self.partial);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        if !self.buffer.is_empty() && find_separator(&self.buffer).is_none() {
            self.buffer.push_str("\n\n");
        }
        let mut events = self.drain();
        if !self.saw_done {
            events.push(format!("data: {DONE}\n\n"));
            self.saw_done = true;
            self.events_forwarded += 1;
        }
        events
    }

    /// Whether a `data: [DONE]` line has been seen (or synthesized).
    pub fn saw_done(&self) -> bool {
        self.saw_done
    }

    /// Number of events emitted so far.
    pub fn events_forwarded(&self) -> u64 {
        self.events_forwarded
    }

    /// Decode a chunk into the text buffer, holding back an incomplete
    /// trailing UTF-8 sequence for the next chunk.
    fn decode(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);
        match std::str::from_utf8(&self.partial) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.partial.clear();
            }
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                self.buffer
                    .push_str(&String::from_utf8_lossy(&self.partial[..valid]));
                self.partial.drain(..valid);
            }
            Err(_) => {
                self.buffer
                    .push_str(&String::from_utf8_lossy(&self.partial));
                self.partial.clear();
            }
        }
    }

    /// Extract and process every complete event currently in the buffer.
    fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some((idx, len)) = find_separator(&self.buffer) {
            let raw: String = self.buffer[..idx].to_string();
            self.buffer.drain(..idx + len);
            if let Some(event) = self.process_event(&raw) {
                out.push(event);
                self.events_forwarded += 1;
            }
        }
        out
    }

    /// Normalize one raw event. Returns `None` when every line was dropped;
    /// such events contribute nothing and are not forwarded.
    fn process_event(&mut self, raw: &str) -> Option<String> {
        let mut lines = Vec::new();
        for line in raw.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(rest) = line.strip_prefix("data:") {
                let data = rest.trim_start();
                if data.is_empty() {
                    continue;
                }
                if data == DONE {
                    self.saw_done = true;
                    lines.push(format!("data: {DONE}"));
                    continue;
                }
                lines.push(format!("data: {}", self.normalize_payload(data)));
            } else if line.starts_with("event:")
                || line.starts_with("id:")
                || line.starts_with("retry:")
                || line.starts_with(':')
            {
                lines.push(line.to_string());
            }
            // Any other line type carries no SSE meaning and is dropped.
        }
        if lines.is_empty() {
            return None;
        }
        let mut event = lines.join("\n");
        event.push_str("\n\n");
        Some(event)
    }

    /// Rewrite model fields in a JSON payload and re-serialize. Payloads that
    /// fail to parse are forwarded verbatim; losing data is worse than
    /// forwarding it untouched.
    fn normalize_payload(&self, data: &str) -> String {
        match serde_json::from_str::<Value>(data) {
            Ok(mut json) => {
                if let Some(model) = self.client_model.as_deref() {
                    rewrite_model_fields(&mut json, model);
                }
                serde_json::to_string(&json).unwrap_or_else(|_| data.to_string())
            }
            Err(_) => data.to_string(),
        }
    }
}

/// Locate the earliest event separator: `\r\n\r\n` or `\n\n`, whichever
/// occurs first. Returns the byte index and the separator length.
fn find_separator(buf: &str) -> Option<(usize, usize)> {
    match (buf.find("\r\n\r\n"), buf.find("\n\n")) {
        (None, None) => None,
        (Some(crlf), None) => Some((crlf, 4)),
        (None, Some(lf)) => Some((lf, 2)),
        (Some(crlf), Some(lf)) => {
            if crlf < lf {
                Some((crlf, 4))
            } else {
                Some((lf, 2))
            }
        }
    }
}
