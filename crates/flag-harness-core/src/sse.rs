// crates/flag-harness-core/src/sse.rs
// ============================================================================
// Module: Event Stream Decoder
// Description: Incremental `text/event-stream` decoder.
// Purpose: Turn arbitrary byte chunks into complete named events.
// Dependencies: stdlib
// ============================================================================

//! ## Overview
//! [`SseDecoder`] accepts bytes in whatever chunking the transport delivers
//! and yields an [`SseEvent`] each time a blank line terminates a record.
//! Lines may end in LF, CR, or CRLF; a CR at the end of one chunk followed by
//! LF at the start of the next counts as a single terminator. Comment lines
//! (`:` prefix) and `id`/`retry` fields are dropped. Events without an
//! explicit `event:` field are named `message`.

// ============================================================================
// SECTION: Types
// ============================================================================

/// Name given to records without an `event:` field.
const DEFAULT_EVENT_NAME: &str = "message";

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Incremental event-stream decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current unterminated line.
    line: Vec<u8>,
    /// True when the previous chunk ended in CR.
    pending_cr: bool,
    /// Name of the record being assembled.
    event: Option<String>,
    /// Data lines of the record being assembled.
    data: Vec<String>,
    /// Whether the record has any field yet.
    has_fields: bool,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' => {
                    self.pending_cr = true;
                    self.end_line(&mut out);
                }
                b'\n' => self.end_line(&mut out),
                other => self.line.push(other),
            }
        }
        out
    }

    /// Returns true when no partial record is buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.line.is_empty() && !self.has_fields
    }

    /// Processes one complete line.
    fn end_line(&mut self, out: &mut Vec<SseEvent>) {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        if line.is_empty() {
            if let Some(event) = self.take_event() {
                out.push(event);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_str(), ""),
        };
        match field {
            "event" => {
                self.event = Some(value.to_string());
                self.has_fields = true;
            }
            "data" => {
                self.data.push(value.to_string());
                self.has_fields = true;
            }
            _ => {}
        }
    }

    /// Completes the current record, if it has any fields.
    fn take_event(&mut self) -> Option<SseEvent> {
        if !self.has_fields {
            return None;
        }
        self.has_fields = false;
        let event = self.event.take().unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string());
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event,
            data,
        })
    }
}
