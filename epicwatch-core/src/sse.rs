//! Incremental server-sent events decoder
//!
//! Byte chunks from the HTTP body are split into lines; `event:`, `data:`
//! and `id:` fields accumulate until a blank line dispatches the message.
//! Comment lines (leading `:`) are skipped and `retry:` is ignored because
//! reconnect timing is owned by the connection manager.
//!
//! A line longer than the decoder's limit is dropped together with the
//! message it belonged to, so a producer that never sends a newline cannot
//! grow the buffer without bound.

/// Longest line accepted by [`SseDecoder::new`]
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseMessage {
    /// Value of the `event:` field, if sent
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`
    pub data: String,
    /// Last `id:` seen on the stream
    pub id: Option<String>,
}

impl SseMessage {
    /// Event name, defaulting to `message` like browsers do
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
    last_id: Option<String>,
    max_line: usize,
    /// Inside an oversized line whose head was already dropped
    discarding: bool,
    oversized_lines: u64,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: None,
            last_id: None,
            max_line,
            discarding: false,
            oversized_lines: 0,
        }
    }

    /// Feed a chunk and return every message it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            line.pop();
            if line.len() > self.max_line {
                self.drop_oversized(line.len());
                self.discarding = false;
                continue;
            }
            if matches!(line.last(), Some(b'\r')) {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }

        if self.buffer.len() > self.max_line {
            let len = self.buffer.len();
            self.buffer.clear();
            if !self.discarding {
                self.drop_oversized(len);
            }
        }
        messages
    }

    /// Lines dropped for exceeding the limit
    pub fn oversized_lines(&self) -> u64 {
        self.oversized_lines
    }

    fn drop_oversized(&mut self, len: usize) {
        tracing::warn!(
            bytes = len,
            limit = self.max_line,
            "Dropping oversized SSE line and its message"
        );
        self.oversized_lines += 1;
        self.event = None;
        self.data = None;
        self.discarding = true;
    }

    /// Whether a message has been started but not yet dispatched
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || self.event.is_some() || self.data.is_some()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        let data = self.data.take();
        if event.is_none() && data.is_none() {
            return None;
        }
        Some(SseMessage {
            event: event.filter(|e| !e.is_empty()),
            data: data.unwrap_or_default(),
            id: self.last_id.clone(),
        })
    }
}
