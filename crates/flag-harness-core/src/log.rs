// crates/flag-harness-core/src/log.rs
// ============================================================================
// Module: Harness Logging
// Description: Structured log events and sinks for harness activity.
// Purpose: Emit JSON-line logs without a hard dependency on a logging stack.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every component that talks to the SDK-under-test (mock endpoints, stream
//! pushes, event sinks, hook callbacks, client commands) records a
//! [`HarnessLogEvent`] through a [`HarnessLogSink`]. Sinks are cheap to share
//! via [`SharedLogSink`] and never fail the caller: a sink that cannot write
//! drops the line.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Structured harness log event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarnessLogEvent {
    /// Event identifier (for example `stream_push`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Emitting component label.
    pub component: &'static str,
    /// Endpoint path or client tag the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Additional structured fields.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl HarnessLogEvent {
    /// Creates a new event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str, component: &'static str, message: impl Into<String>) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            component,
            scope: None,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Attaches the endpoint path or client tag.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Attaches a structured field.
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Sink for harness log events.
pub trait HarnessLogSink: Send + Sync {
    /// Record a log event.
    fn record(&self, event: &HarnessLogEvent);
}

/// Shared, thread-safe log sink handle.
pub type SharedLogSink = Arc<dyn HarnessLogSink>;

/// Log sink that writes JSON lines to stderr.
pub struct StderrLogSink;

impl HarnessLogSink for StderrLogSink {
    fn record(&self, event: &HarnessLogEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Log sink that appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl HarnessLogSink for FileLogSink {
    fn record(&self, event: &HarnessLogEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op log sink.
pub struct NoopLogSink;

impl HarnessLogSink for NoopLogSink {
    fn record(&self, _event: &HarnessLogEvent) {}
}

/// Log sink that keeps events in memory for assertions.
#[derive(Default)]
pub struct MemoryLogSink {
    /// Captured events in arrival order.
    events: Mutex<Vec<HarnessLogEvent>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every captured event.
    #[must_use]
    pub fn events(&self) -> Vec<HarnessLogEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns captured events with the given identifier.
    #[must_use]
    pub fn events_named(&self, event: &str) -> Vec<HarnessLogEvent> {
        self.events().into_iter().filter(|entry| entry.event == event).collect()
    }
}

impl HarnessLogSink for MemoryLogSink {
    fn record(&self, event: &HarnessLogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
