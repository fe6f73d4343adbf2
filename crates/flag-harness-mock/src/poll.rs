// crates/flag-harness-mock/src/poll.rs
// ============================================================================
// Module: Polling Service
// Description: Discrete poll responses over the shared data source.
// Purpose: Serve the same committed state the streaming service serves.
// Dependencies: axum, flag-harness-core
// ============================================================================

//! ## Overview
//! Legacy polls receive the full JSON data set. Versioned polls receive
//! `{"events":[{"event","data"}...]}` containing exactly the frames a stream
//! connect with the same `basis` would receive. Staged changes are never
//! visible to a poll.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use flag_harness_core::DataSet;
use flag_harness_core::HarnessLogEvent;
use flag_harness_core::NoopLogSink;
use flag_harness_core::SharedLogSink;
use flag_harness_core::StreamProtocol;
use serde_json::Value;

use crate::endpoint::CancelSignal;
use crate::endpoint::RequestRecord;
use crate::error::MockError;
use crate::handler::EndpointHandler;
use crate::source::DataSource;
use crate::source::StaleBasisPolicy;

/// Polling endpoint handler.
#[derive(Clone)]
pub struct PollingService {
    /// Committed data.
    source: DataSource,
    /// Response framing.
    protocol: StreamProtocol,
    /// Answer for a known but outdated basis.
    stale_basis: StaleBasisPolicy,
    /// Log sink.
    log: SharedLogSink,
}

impl PollingService {
    /// Creates a versioned polling service over a fresh data source.
    #[must_use]
    pub fn new(data: impl Into<DataSet>) -> Self {
        Self::with_source(DataSource::new(data), StreamProtocol::Versioned)
    }

    /// Creates a polling service over an existing (possibly shared) source.
    #[must_use]
    pub fn with_source(source: DataSource, protocol: StreamProtocol) -> Self {
        Self {
            source,
            protocol,
            stale_basis: StaleBasisPolicy::FullTransfer,
            log: Arc::new(NoopLogSink),
        }
    }

    /// Sets the stale-basis policy.
    #[must_use]
    pub const fn with_stale_basis(mut self, policy: StaleBasisPolicy) -> Self {
        self.stale_basis = policy;
        self
    }

    /// Sets the log sink.
    #[must_use]
    pub fn with_log(mut self, log: SharedLogSink) -> Self {
        self.log = log;
        self
    }

    /// Backing data source.
    #[must_use]
    pub const fn source(&self) -> &DataSource {
        &self.source
    }

    /// Builds the response body for a poll carrying `basis`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the data source is poisoned.
    pub fn poll_body(&self, basis: Option<&str>) -> Result<Value, MockError> {
        match self.protocol {
            StreamProtocol::Legacy => self.source.legacy_data(),
            StreamProtocol::Versioned => {
                let frames = self.source.initial_transfer(basis, self.stale_basis)?;
                let events: Vec<Value> = frames.iter().map(|frame| frame.to_poll_entry()).collect();
                Ok(serde_json::json!({ "events": events }))
            }
        }
    }
}

#[async_trait]
impl EndpointHandler for PollingService {
    async fn serve(&self, request: RequestRecord, _cancel: CancelSignal) -> Response {
        let basis = request.query_param("basis");
        match self.poll_body(basis.as_deref()) {
            Ok(body) => {
                self.log.record(
                    &HarnessLogEvent::new("poll", "poll", request.describe())
                        .field("basis", basis.unwrap_or_default()),
                );
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        }
    }
}
