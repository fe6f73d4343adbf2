// crates/flag-harness-mock/src/endpoint.rs
// ============================================================================
// Module: Mock Endpoints
// Description: Endpoint registration, request ledger, and connection control.
// Purpose: Let tests make timeout-bounded assertions about network activity.
// Dependencies: bytes, tokio, url
// ============================================================================

//! ## Overview
//! An [`Endpoint`] is one URL prefix on the mock server with one active
//! handler. Every request routed to it is appended to a monotonic ledger as a
//! [`Connection`] before the handler runs, so a test that waits for a
//! connection never races the handler. `await_connection` consumes ledger
//! entries in arrival order; `require_no_connection` fails if any unconsumed
//! entry appears within the window. Dropping the endpoint unregisters it and
//! cancels every open connection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use flag_harness_core::SharedLogSink;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::MockError;
use crate::handler::SharedHandler;
use crate::server::EndpointRegistry;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Captured incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// HTTP method (including extension methods such as `REPORT`).
    pub method: String,
    /// Path relative to the endpoint base URL, always starting with `/`.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Headers with lowercase names, in arrival order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

impl RequestRecord {
    /// Returns the first header value with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the decoded value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Decode`] when the body is not valid JSON.
    pub fn body_json(&self) -> Result<Value, MockError> {
        serde_json::from_slice(&self.body).map_err(|err| MockError::Decode(err.to_string()))
    }

    /// Short `METHOD /path?query` description.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.query {
            Some(query) => format!("{} {}?{query}", self.method, self.path),
            None => format!("{} {}", self.method, self.path),
        }
    }
}

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Handler-side view of a connection's cancel state.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    /// Cancel flag watcher.
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Returns true once the connection was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the connection is cancelled or its endpoint is gone.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// One recorded request plus its cancel control.
#[derive(Debug)]
pub struct Connection {
    /// Zero-based arrival index on the endpoint.
    index: usize,
    /// Captured request.
    request: RequestRecord,
    /// Cancel flag.
    cancel: watch::Sender<bool>,
}

impl Connection {
    /// Arrival index on the endpoint.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Captured request.
    #[must_use]
    pub const fn request(&self) -> &RequestRecord {
        &self.request
    }

    /// Cancels the connection; open streams end immediately.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

// ============================================================================
// SECTION: Shared Endpoint State
// ============================================================================

/// Ledger of connections and the consumption cursor.
#[derive(Default)]
struct Ledger {
    /// Every connection in arrival order.
    connections: Vec<Arc<Connection>>,
    /// Index of the next connection `await_connection` returns.
    cursor: usize,
}

/// State shared between an [`Endpoint`] and the server dispatcher.
pub(crate) struct EndpointShared {
    /// Registry identifier.
    id: u64,
    /// Endpoint base URL without trailing slash.
    base_url: String,
    /// Active handler.
    handler: Mutex<SharedHandler>,
    /// Connection ledger.
    ledger: Mutex<Ledger>,
    /// Wakes waiters on every new connection.
    notify: Notify,
}

impl EndpointShared {
    /// Creates endpoint state.
    pub(crate) fn new(id: u64, base_url: String, handler: SharedHandler) -> Self {
        Self {
            id,
            base_url,
            handler: Mutex::new(handler),
            ledger: Mutex::new(Ledger::default()),
            notify: Notify::new(),
        }
    }

    /// Endpoint base URL.
    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the active handler.
    pub(crate) fn handler(&self) -> Option<SharedHandler> {
        self.handler.lock().ok().map(|handler| Arc::clone(&handler))
    }

    /// Appends a request to the ledger and wakes waiters.
    pub(crate) fn record(&self, request: RequestRecord) -> CancelSignal {
        let (cancel, rx) = watch::channel(false);
        if let Ok(mut ledger) = self.ledger.lock() {
            let index = ledger.connections.len();
            ledger.connections.push(Arc::new(Connection {
                index,
                request,
                cancel,
            }));
        }
        self.notify.notify_waiters();
        CancelSignal {
            rx,
        }
    }

    /// Consumes the next unconsumed connection.
    fn take_next(&self) -> Option<Arc<Connection>> {
        let mut ledger = self.ledger.lock().ok()?;
        let connection = ledger.connections.get(ledger.cursor).cloned()?;
        ledger.cursor += 1;
        Some(connection)
    }

    /// Snapshot of the ledger.
    fn connections(&self) -> Vec<Arc<Connection>> {
        self.ledger.lock().map(|ledger| ledger.connections.clone()).unwrap_or_default()
    }

    /// Cancels every connection recorded so far.
    pub(crate) fn cancel_all(&self) {
        for connection in self.connections() {
            connection.cancel();
        }
    }
}

// ============================================================================
// SECTION: Endpoint Handle
// ============================================================================

/// Test-owned handle to a registered endpoint.
pub struct Endpoint {
    /// Shared state.
    shared: Arc<EndpointShared>,
    /// Registry to unregister from on drop.
    registry: Arc<EndpointRegistry>,
    /// Log sink.
    log: SharedLogSink,
}

impl Endpoint {
    /// Wraps registered state.
    pub(crate) const fn new(
        shared: Arc<EndpointShared>,
        registry: Arc<EndpointRegistry>,
        log: SharedLogSink,
    ) -> Self {
        Self {
            shared,
            registry,
            log,
        }
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.shared.base_url()
    }

    /// Base URL with a trailing slash; routes identically.
    #[must_use]
    pub fn base_url_with_slash(&self) -> String {
        format!("{}/", self.shared.base_url())
    }

    /// Replaces the active handler for subsequent requests.
    pub fn set_handler(&self, handler: SharedHandler) {
        if let Ok(mut active) = self.shared.handler.lock() {
            *active = handler;
        }
    }

    /// Waits up to `timeout` for the next unconsumed connection.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Timeout`] when no connection arrives in time.
    pub async fn await_connection(&self, timeout: Duration) -> Result<Arc<Connection>, MockError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(connection) = self.shared.take_next() {
                return Ok(connection);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.shared.take_next().ok_or_else(|| {
                    MockError::timeout(format!("connection to {}", self.base_url()), timeout)
                });
            }
        }
    }

    /// Fails if any unconsumed connection appears within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::UnexpectedConnection`] naming the request.
    pub async fn require_no_connection(&self, timeout: Duration) -> Result<(), MockError> {
        match self.await_connection(timeout).await {
            Ok(connection) => Err(MockError::UnexpectedConnection {
                endpoint: self.base_url().to_string(),
                request: connection.request().describe(),
            }),
            Err(err) if err.is_timeout() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Every connection received so far, consumed or not.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.shared.connections()
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.shared.connections().iter().map(|connection| connection.request().clone()).collect()
    }

    /// Number of connections received so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections().len()
    }

    /// Cancels every connection received so far.
    pub fn cancel_all(&self) {
        self.shared.cancel_all();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.registry.remove(self.shared.id);
        self.cancel_all();
        self.log.record(
            &flag_harness_core::HarnessLogEvent::new("endpoint_closed", "mock", "endpoint dropped")
                .scope(self.base_url()),
        );
    }
}
