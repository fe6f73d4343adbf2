// crates/flag-harness-mock/src/events.rs
// ============================================================================
// Module: Event Sink
// Description: Mock analytics collector and event payload decoder.
// Purpose: Capture posted event batches for timeout-bounded assertions.
// Dependencies: axum, flate2, serde_json
// ============================================================================

//! ## Overview
//! An [`EventSink`] owns one endpoint that accepts analytics and diagnostic
//! posts. Bodies declared with `Content-Encoding: gzip` are inflated before
//! decoding. Analytics posts (a JSON array) are decoded into
//! [`AnalyticsEvent`] variants and queued as one [`EventBatch`] per request;
//! any path containing `diagnostic` is queued separately. Every accepted post
//! is answered with `202 Accepted`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use flag_harness_core::HarnessLogEvent;
use flag_harness_core::SharedLogSink;
use flate2::read::GzDecoder;
use serde_json::Value;

use crate::endpoint::CancelSignal;
use crate::endpoint::Endpoint;
use crate::endpoint::RequestRecord;
use crate::error::MockError;
use crate::handler::EndpointHandler;
use crate::queue::BlockingQueue;
use crate::server::MockServerHandle;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the per-flush payload id.
pub const PAYLOAD_ID_HEADER: &str = "x-launchdarkly-payload-id";

// ============================================================================
// SECTION: Events
// ============================================================================

/// One decoded analytics event, tagged by its `kind` field.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsEvent {
    /// Context index event.
    Index(Value),
    /// Identify event.
    Identify(Value),
    /// Full-fidelity feature event.
    Feature(Value),
    /// Debug feature event.
    Debug(Value),
    /// Summary of evaluations.
    Summary(Value),
    /// Custom event.
    Custom(Value),
    /// Alias event.
    Alias(Value),
    /// Migration operation event.
    MigrationOp(Value),
    /// Any other kind, kept verbatim.
    Unknown(Value),
}

impl AnalyticsEvent {
    /// Decodes one event object by its `kind` field.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default().to_string();
        match kind.as_str() {
            "index" => Self::Index(value),
            "identify" => Self::Identify(value),
            "feature" => Self::Feature(value),
            "debug" => Self::Debug(value),
            "summary" => Self::Summary(value),
            "custom" => Self::Custom(value),
            "alias" => Self::Alias(value),
            "migration_op" => Self::MigrationOp(value),
            _ => Self::Unknown(value),
        }
    }

    /// Wire `kind` label.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Index(_) => "index",
            Self::Identify(_) => "identify",
            Self::Feature(_) => "feature",
            Self::Debug(_) => "debug",
            Self::Summary(_) => "summary",
            Self::Custom(_) => "custom",
            Self::Alias(_) => "alias",
            Self::MigrationOp(_) => "migration_op",
            Self::Unknown(value) => value.get("kind").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    /// Raw event object.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        match self {
            Self::Index(value)
            | Self::Identify(value)
            | Self::Feature(value)
            | Self::Debug(value)
            | Self::Summary(value)
            | Self::Custom(value)
            | Self::Alias(value)
            | Self::MigrationOp(value)
            | Self::Unknown(value) => value,
        }
    }

    /// Returns a top-level field of the event.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload().get(name)
    }
}

/// Events posted in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    /// Decoded events in posted order.
    pub events: Vec<AnalyticsEvent>,
    /// Payload id header, if sent.
    pub payload_id: Option<String>,
    /// True when the body arrived gzip-encoded.
    pub gzipped: bool,
    /// Request path relative to the sink base URL.
    pub path: String,
}

impl EventBatch {
    /// Events of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: &str) -> Vec<&AnalyticsEvent> {
        self.events.iter().filter(|event| event.kind() == kind).collect()
    }
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Queues shared with the endpoint handler.
struct EventQueues {
    /// Analytics batches.
    analytics: BlockingQueue<EventBatch>,
    /// Diagnostic payloads.
    diagnostics: BlockingQueue<Value>,
    /// Largest accepted body after inflation.
    max_body_bytes: usize,
    /// Log sink.
    log: SharedLogSink,
}

/// Mock analytics collector.
pub struct EventSink {
    /// Captured payloads.
    queues: Arc<EventQueues>,
    /// Registered endpoint.
    endpoint: Endpoint,
}

impl EventSink {
    /// Registers a collector endpoint on the server.
    #[must_use]
    pub fn new(server: &MockServerHandle) -> Self {
        let queues = Arc::new(EventQueues {
            analytics: BlockingQueue::new(),
            diagnostics: BlockingQueue::new(),
            max_body_bytes: server.max_body_bytes(),
            log: server.log(),
        });
        let endpoint = server.register(Arc::clone(&queues) as Arc<dyn EndpointHandler>);
        Self {
            queues,
            endpoint,
        }
    }

    /// Collector base URL, used as the SDK events base URI.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.endpoint.base_url()
    }

    /// Underlying endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Waits up to `timeout` for the next analytics batch.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Timeout`] when no batch arrives.
    pub async fn expect_batch(&self, timeout: Duration) -> Result<EventBatch, MockError> {
        self.queues
            .analytics
            .pop(timeout)
            .await
            .ok_or_else(|| MockError::timeout(format!("event batch at {}", self.base_url()), timeout))
    }

    /// Fails if an analytics batch arrives within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Unexpected`] describing the batch.
    pub async fn expect_no_batch(&self, timeout: Duration) -> Result<(), MockError> {
        self.queues.analytics.expect_empty(timeout).await.map_err(|batch| MockError::Unexpected {
            what: "event batch".to_string(),
            detail: batch
                .events
                .iter()
                .map(AnalyticsEvent::kind)
                .collect::<Vec<_>>()
                .join(","),
        })
    }

    /// Waits up to `timeout` for the next diagnostic payload.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Timeout`] when no payload arrives.
    pub async fn expect_diagnostic(&self, timeout: Duration) -> Result<Value, MockError> {
        self.queues.diagnostics.pop(timeout).await.ok_or_else(|| {
            MockError::timeout(format!("diagnostic event at {}", self.base_url()), timeout)
        })
    }
}

// ============================================================================
// SECTION: Handler
// ============================================================================

#[async_trait]
impl EndpointHandler for EventQueues {
    async fn serve(&self, request: RequestRecord, _cancel: CancelSignal) -> Response {
        let gzipped =
            request.header("content-encoding").is_some_and(|value| value.eq_ignore_ascii_case("gzip"));
        let payload = match decode_body(&request.body, gzipped, self.max_body_bytes) {
            Ok(payload) => payload,
            Err(err) => {
                self.log.record(
                    &HarnessLogEvent::new("event_decode_failed", "events", err.to_string())
                        .field("path", request.path.clone()),
                );
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
        };
        if request.path.contains("diagnostic") {
            self.log.record(&HarnessLogEvent::new("diagnostic_event", "events", request.describe()));
            self.diagnostics.push(payload);
            return StatusCode::ACCEPTED.into_response();
        }
        let events: Vec<AnalyticsEvent> = match payload {
            Value::Array(items) => items.into_iter().map(AnalyticsEvent::from_value).collect(),
            other => vec![AnalyticsEvent::from_value(other)],
        };
        self.log.record(
            &HarnessLogEvent::new("event_batch", "events", request.describe())
                .field("events", events.len())
                .field("gzipped", gzipped),
        );
        self.analytics.push(EventBatch {
            events,
            payload_id: request.header(PAYLOAD_ID_HEADER).map(ToString::to_string),
            gzipped,
            path: request.path.clone(),
        });
        StatusCode::ACCEPTED.into_response()
    }
}

/// Inflates (when declared) and parses a posted body. Inflation stops one
/// byte past `limit` so an oversized body is rejected without being held.
fn decode_body(body: &[u8], gzipped: bool, limit: usize) -> Result<Value, MockError> {
    if gzipped {
        let mut inflated = Vec::new();
        let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        GzDecoder::new(body)
            .take(cap)
            .read_to_end(&mut inflated)
            .map_err(|err| MockError::Decode(format!("gzip body: {err}")))?;
        if inflated.len() > limit {
            return Err(MockError::Decode(format!("inflated body exceeds {limit} bytes")));
        }
        serde_json::from_slice(&inflated).map_err(|err| MockError::Decode(err.to_string()))
    } else {
        serde_json::from_slice(body).map_err(|err| MockError::Decode(err.to_string()))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
