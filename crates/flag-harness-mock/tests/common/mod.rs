// crates/flag-harness-mock/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared helpers for flag-harness-mock integration tests.
// Purpose: Start servers and read event streams the way an SDK would.
// Dependencies: flag-harness-core, flag-harness-mock, reqwest
// ============================================================================

//! ## Overview
//! Provides a server starter and a small event-stream reader built on the core
//! [`SseDecoder`], so tests observe exactly the frames an SDK would.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::VecDeque;
use std::time::Duration;

use flag_harness_core::EntityKind;
use flag_harness_core::FlagBuilder;
use flag_harness_core::SegmentBuilder;
use flag_harness_core::ServerDataSet;
use flag_harness_core::SseDecoder;
use flag_harness_core::SseEvent;
use flag_harness_mock::MockServer;
use flag_harness_mock::MockServerOptions;
use serde_json::Value;

/// Default wait used by tests.
pub const WAIT: Duration = Duration::from_secs(5);
/// Short wait for "nothing happens" checks.
pub const QUIET: Duration = Duration::from_millis(200);

/// Starts a mock server on loopback.
pub fn start_server() -> MockServer {
    MockServer::start(MockServerOptions::default()).expect("mock server starts")
}

/// Two flags and one segment at version 1.
pub fn sample_data() -> ServerDataSet {
    ServerDataSet::builder()
        .flag(FlagBuilder::single_value("flag-a", 1, Value::from("a1")))
        .flag(FlagBuilder::single_value("flag-b", 1, Value::from(true)))
        .segment(SegmentBuilder::new("seg-1").version(1).included(["user-1"]).build())
        .build()
}

/// Reads `text/event-stream` frames from a live response.
pub struct StreamReader {
    response: reqwest::Response,
    decoder: SseDecoder,
    buffered: VecDeque<SseEvent>,
}

impl StreamReader {
    /// Opens a stream with a GET request.
    pub async fn open(url: &str) -> Result<Self, String> {
        let response = reqwest::get(url).await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("stream open returned {}", response.status()));
        }
        Ok(Self {
            response,
            decoder: SseDecoder::new(),
            buffered: VecDeque::new(),
        })
    }

    /// Returns the next frame, failing after `timeout`.
    pub async fn next_event(&mut self, timeout: Duration) -> Result<SseEvent, String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Ok(event);
            }
            let chunk = tokio::time::timeout_at(deadline, self.response.chunk())
                .await
                .map_err(|_| format!("no stream event within {timeout:?}"))?
                .map_err(|err| err.to_string())?;
            match chunk {
                Some(bytes) => self.buffered.extend(self.decoder.push(&bytes)),
                None => return Err("stream ended".to_string()),
            }
        }
    }

    /// Reads `count` frames.
    pub async fn next_events(&mut self, count: usize) -> Result<Vec<SseEvent>, String> {
        let mut events = Vec::with_capacity(count);
        for _ in 0 .. count {
            events.push(self.next_event(WAIT).await?);
        }
        Ok(events)
    }

    /// Succeeds when the stream ends (or errors) within `timeout`.
    pub async fn expect_end(&mut self, timeout: Duration) -> Result<(), String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.response.chunk()).await {
                Err(_) => return Err(format!("stream still open after {timeout:?}")),
                Ok(Err(_) | Ok(None)) => return Ok(()),
                Ok(Ok(Some(bytes))) => self.buffered.extend(self.decoder.push(&bytes)),
            }
        }
    }

    /// Succeeds when no frame arrives within `timeout`.
    pub async fn expect_silence(&mut self, timeout: Duration) -> Result<(), String> {
        match self.next_event(timeout).await {
            Ok(event) => Err(format!("unexpected frame {}: {}", event.event, event.data)),
            Err(_) => Ok(()),
        }
    }
}

/// Event names of a frame list.
pub fn names(events: &[SseEvent]) -> Vec<&str> {
    events.iter().map(|event| event.event.as_str()).collect()
}

/// Parses a frame payload as JSON.
pub fn frame_json(event: &SseEvent) -> Value {
    serde_json::from_str(&event.data).expect("frame payload is JSON")
}

/// Extracts `payload-transferred` state from a frame.
pub fn state_of(event: &SseEvent) -> String {
    frame_json(event)["state"].as_str().expect("state string").to_string()
}

/// Extracts the intent code of a `server-intent` frame.
pub fn intent_code(event: &SseEvent) -> String {
    frame_json(event)["payloads"][0]["intentCode"].as_str().expect("intent code").to_string()
}

/// Flag kind label for assertions.
pub fn flag_kind() -> &'static str {
    EntityKind::Flag.as_str()
}
