// crates/flag-harness-mock/src/handler.rs
// ============================================================================
// Module: Endpoint Handlers
// Description: Pluggable request handlers for mock endpoints.
// Purpose: Script backend responses, failures, and per-connection sequences.
// Dependencies: async-trait, axum, bytes, tokio-stream
// ============================================================================

//! ## Overview
//! Every endpoint delegates to one [`EndpointHandler`]. The handlers here
//! cover scripted failure injection; the stream, poll, event, and hook
//! services implement the same trait so they can be mixed into a
//! [`SequentialHandler`] (for example: `503`, then a broken connection, then a
//! working stream).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;

use crate::endpoint::CancelSignal;
use crate::endpoint::RequestRecord;
use crate::error::MockError;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Serves requests routed to an endpoint.
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    /// Produces the response for one request.
    async fn serve(&self, request: RequestRecord, cancel: CancelSignal) -> Response;
}

/// Shared handler handle.
pub type SharedHandler = Arc<dyn EndpointHandler>;

#[async_trait]
impl<H: EndpointHandler + ?Sized> EndpointHandler for Arc<H> {
    async fn serve(&self, request: RequestRecord, cancel: CancelSignal) -> Response {
        (**self).serve(request, cancel).await
    }
}

/// Wraps a handler for registration or sequencing.
#[must_use]
pub fn shared<H: EndpointHandler + 'static>(handler: H) -> SharedHandler {
    Arc::new(handler)
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Responds with a bare status and empty body.
#[derive(Debug, Clone, Copy)]
pub struct StatusHandler {
    /// Status code.
    status: u16,
}

impl StatusHandler {
    /// Creates a handler for the given status code.
    #[must_use]
    pub const fn new(status: u16) -> Self {
        Self {
            status,
        }
    }
}

#[async_trait]
impl EndpointHandler for StatusHandler {
    async fn serve(&self, _request: RequestRecord, _cancel: CancelSignal) -> Response {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR).into_response()
    }
}

/// Responds with a fixed JSON body.
#[derive(Debug, Clone)]
pub struct JsonHandler {
    /// Status code.
    status: u16,
    /// Response body.
    body: Value,
}

impl JsonHandler {
    /// Creates a `200` handler.
    #[must_use]
    pub const fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
        }
    }

    /// Creates a handler with an explicit status.
    #[must_use]
    pub const fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
        }
    }
}

#[async_trait]
impl EndpointHandler for JsonHandler {
    async fn serve(&self, _request: RequestRecord, _cancel: CancelSignal) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self.body.clone())).into_response()
    }
}

/// Sends response headers, then fails the body with an I/O error.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokenConnectionHandler;

#[async_trait]
impl EndpointHandler for BrokenConnectionHandler {
    async fn serve(&self, _request: RequestRecord, _cancel: CancelSignal) -> Response {
        let failure = tokio_stream::iter([Err::<Bytes, io::Error>(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "injected connection failure",
        ))]);
        (StatusCode::OK, [(CONTENT_TYPE, "text/event-stream")], Body::from_stream(failure))
            .into_response()
    }
}

/// Routes the Nth connection to the Nth handler; later connections reuse the last.
pub struct SequentialHandler {
    /// Handlers in connection order.
    handlers: Vec<SharedHandler>,
    /// Connections served so far.
    next: AtomicUsize,
}

impl SequentialHandler {
    /// Creates a chain.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when `handlers` is empty.
    pub fn new(handlers: Vec<SharedHandler>) -> Result<Self, MockError> {
        if handlers.is_empty() {
            return Err(MockError::Wiring(
                "sequential handler needs at least one handler".to_string(),
            ));
        }
        Ok(Self {
            handlers,
            next: AtomicUsize::new(0),
        })
    }

    /// Number of connections routed so far.
    #[must_use]
    pub fn served(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointHandler for SequentialHandler {
    async fn serve(&self, request: RequestRecord, cancel: CancelSignal) -> Response {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let last = self.handlers.len().saturating_sub(1);
        match self.handlers.get(index.min(last)) {
            Some(handler) => handler.serve(request, cancel).await,
            None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}
