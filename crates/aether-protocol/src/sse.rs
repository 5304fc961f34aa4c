use bytes::Bytes;
use serde::de::IgnoredAny;

/// Payload OpenAI-flavored upstreams send as their final `data:` line.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

/// Incremental SSE tokenizer.
///
/// Bytes can be pushed in arbitrary chunks (`push_bytes`/`push_str`) or one
/// line at a time (`feed_line`). A `data:` line that follows an already
/// complete JSON payload (or `[DONE]`) without a blank separator closes the
/// pending event first; some upstreams skip the separator.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers raw bytes and decodes only complete lines, so a multi-byte
    /// character split across chunks survives.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(self.feed_line(&String::from_utf8_lossy(&line)));
        }

        events
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.push_bytes(chunk.as_bytes())
    }

    /// Feeds one line, with or without its trailing line terminator.
    pub fn feed_line(&mut self, line: &str) -> Vec<SseEvent> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut events = Vec::new();

        if line.is_empty() {
            self.finish_event(&mut events);
            return events;
        }

        if line.starts_with(':') {
            return events;
        }

        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            if !self.data_lines.is_empty() {
                self.finish_event(&mut events);
            }
            self.event = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
            return events;
        }
        if line == "event" {
            self.event = None;
            return events;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if self.pending_is_complete() {
                self.finish_event(&mut events);
            }
            self.data_lines.push(value.to_string());
            return events;
        }
        if line == "data" {
            self.data_lines.push(String::new());
        }

        events
    }

    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            events.extend(self.feed_line(&String::from_utf8_lossy(&line)));
        }
        self.finish_event(&mut events);
        events
    }

    fn pending_is_complete(&self) -> bool {
        if self.data_lines.is_empty() {
            return false;
        }
        let joined = self.data_lines.join("\n");
        let trimmed = joined.trim();
        if trimmed == DONE_SENTINEL {
            return true;
        }
        (trimmed.starts_with('{') || trimmed.starts_with('['))
            && serde_json::from_str::<IgnoredAny>(trimmed).is_ok()
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
        });
        self.data_lines.clear();
    }
}

/// Frames one SSE event: optional `event:` line, one `data:` line per line
/// of `data`, blank line.
pub fn encode_sse(event: Option<&str>, data: &str) -> Bytes {
    let mut out = Vec::with_capacity(data.len() + 32);
    if let Some(name) = event {
        out.extend_from_slice(b"event: ");
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
    }
    for line in data.split('\n') {
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    out.push(b'\n');
    Bytes::from(out)
}

pub fn encode_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
