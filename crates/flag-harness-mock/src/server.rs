// crates/flag-harness-mock/src/server.rs
// ============================================================================
// Module: Mock Server
// Description: Single HTTP listener hosting every mock endpoint.
// Purpose: Route requests to registered endpoints by path prefix.
// Dependencies: axum, tokio
// ============================================================================

//! ## Overview
//! [`MockServer`] binds one ephemeral port and serves it from a dedicated
//! thread with its own runtime, so long-lived streams keep flowing while test
//! code blocks. Endpoints live under `/endpoints/<id>`; repeated slashes in
//! the request path are collapsed so a base URL with a trailing slash routes
//! the same as one without. Dropping the server shuts the listener down and
//! joins the thread.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;

use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::response::Response;
use flag_harness_core::HarnessLogEvent;
use flag_harness_core::NoopLogSink;
use flag_harness_core::SharedLogSink;
use tokio::runtime::Builder;
use tokio::sync::oneshot;

use crate::endpoint::Endpoint;
use crate::endpoint::EndpointShared;
use crate::endpoint::RequestRecord;
use crate::error::MockError;
use crate::handler::EndpointHandler;
use crate::handler::SharedHandler;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Path prefix under which endpoints are registered.
const ENDPOINT_PREFIX: &str = "/endpoints/";

// ============================================================================
// SECTION: Options
// ============================================================================

/// Mock server startup options.
#[derive(Clone)]
pub struct MockServerOptions {
    /// Host to bind (port is always ephemeral).
    pub bind_host: String,
    /// Maximum accepted request body.
    pub max_body_bytes: usize,
    /// Log sink for request and lifecycle events.
    pub log: SharedLogSink,
}

impl Default for MockServerOptions {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            max_body_bytes: 1024 * 1024,
            log: Arc::new(NoopLogSink),
        }
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Endpoint lookup shared by the dispatcher and endpoint handles.
pub(crate) struct EndpointRegistry {
    /// Server base URL.
    base_url: String,
    /// Registered endpoints by id.
    endpoints: Mutex<HashMap<u64, Arc<EndpointShared>>>,
    /// Next endpoint id.
    next_id: AtomicU64,
    /// Request body limit, also applied to inflated bodies.
    max_body_bytes: usize,
    /// Log sink.
    log: SharedLogSink,
}

impl EndpointRegistry {
    /// Looks up an endpoint.
    fn get(&self, id: u64) -> Option<Arc<EndpointShared>> {
        self.endpoints.lock().ok().and_then(|endpoints| endpoints.get(&id).cloned())
    }

    /// Cancels every connection on every registered endpoint.
    fn cancel_all(&self) {
        let endpoints: Vec<Arc<EndpointShared>> = self
            .endpoints
            .lock()
            .map(|endpoints| endpoints.values().cloned().collect())
            .unwrap_or_default();
        for endpoint in endpoints {
            endpoint.cancel_all();
        }
    }

    /// Unregisters an endpoint.
    pub(crate) fn remove(&self, id: u64) {
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.remove(&id);
        }
    }
}

/// Cloneable handle that can register endpoints on a running server.
#[derive(Clone)]
pub struct MockServerHandle {
    /// Shared registry.
    registry: Arc<EndpointRegistry>,
}

impl MockServerHandle {
    /// Server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.registry.base_url
    }

    /// Request body limit in bytes.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.registry.max_body_bytes
    }

    /// Log sink shared with endpoints and services.
    #[must_use]
    pub fn log(&self) -> SharedLogSink {
        Arc::clone(&self.registry.log)
    }

    /// Registers a new endpoint served by `handler`.
    pub fn new_endpoint<H: EndpointHandler + 'static>(&self, handler: H) -> Endpoint {
        self.register(Arc::new(handler))
    }

    /// Registers a new endpoint served by an already-shared handler.
    #[must_use]
    pub fn register(&self, handler: SharedHandler) -> Endpoint {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        let base_url = format!("{}{ENDPOINT_PREFIX}{id}", self.registry.base_url);
        let shared = Arc::new(EndpointShared::new(id, base_url, handler));
        if let Ok(mut endpoints) = self.registry.endpoints.lock() {
            endpoints.insert(id, Arc::clone(&shared));
        }
        Endpoint::new(shared, Arc::clone(&self.registry), Arc::clone(&self.registry.log))
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Running mock backend server.
pub struct MockServer {
    /// Registration handle.
    handle: MockServerHandle,
    /// Shutdown trigger.
    shutdown: Option<oneshot::Sender<()>>,
    /// Server thread.
    join: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    /// Binds an ephemeral port and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Startup`] when the listener cannot be bound.
    pub fn start(options: MockServerOptions) -> Result<Self, MockError> {
        let listener = StdTcpListener::bind((options.bind_host.as_str(), 0))
            .map_err(|err| MockError::Startup(format!("bind failed: {err}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| MockError::Startup(format!("listener nonblocking failed: {err}")))?;
        let addr =
            listener.local_addr().map_err(|err| MockError::Startup(format!("local addr: {err}")))?;
        let base_url = format!("http://{}", reachable_addr(addr));

        let registry = Arc::new(EndpointRegistry {
            base_url,
            endpoints: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_body_bytes: options.max_body_bytes,
            log: Arc::clone(&options.log),
        });
        let app = Router::new()
            .fallback(dispatch)
            .with_state(Arc::clone(&registry))
            .layer(DefaultBodyLimit::max(options.max_body_bytes));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        let join = thread::spawn(move || {
            let runtime = match Builder::new_multi_thread().worker_threads(2).enable_all().build() {
                Ok(runtime) => runtime,
                Err(error) => {
                    let _ = ready_tx.send(Err(error.to_string()));
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(error) => {
                        let _ = ready_tx.send(Err(error.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                });
                let _ = server.await;
            });
        });
        ready_rx
            .recv()
            .map_err(|err| MockError::Startup(err.to_string()))?
            .map_err(MockError::Startup)?;
        options.log.record(
            &HarnessLogEvent::new("server_started", "mock", "mock server listening")
                .scope(registry.base_url.clone()),
        );
        Ok(Self {
            handle: MockServerHandle {
                registry,
            },
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.handle.base_url()
    }

    /// Cloneable registration handle.
    #[must_use]
    pub fn handle(&self) -> MockServerHandle {
        self.handle.clone()
    }

    /// Registers a new endpoint served by `handler`.
    pub fn new_endpoint<H: EndpointHandler + 'static>(&self, handler: H) -> Endpoint {
        self.handle.new_endpoint(handler)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        // Open streams would otherwise hold graceful shutdown forever.
        self.handle.registry.cancel_all();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Routes a request to its endpoint handler.
async fn dispatch(
    State(registry): State<Arc<EndpointRegistry>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = collapse_slashes(uri.path());
    let Some((id, rest)) = split_endpoint_path(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(endpoint) = registry.get(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(handler) = endpoint.handler() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let request = RequestRecord {
        method: method.as_str().to_string(),
        path: rest,
        query: uri.query().map(ToString::to_string),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect(),
        body,
    };
    registry.log.record(
        &HarnessLogEvent::new("request", "mock", request.describe())
            .scope(endpoint.base_url())
            .field("body_bytes", request.body.len()),
    );
    let cancel = endpoint.record(request.clone());
    handler.serve(request, cancel).await
}

/// Collapses runs of `/` into one.
fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Splits `/endpoints/<id>/rest` into the id and `/rest`.
fn split_endpoint_path(path: &str) -> Option<(u64, String)> {
    let tail = path.strip_prefix(ENDPOINT_PREFIX)?;
    let (id, rest) = match tail.find('/') {
        Some(index) => (&tail[.. index], &tail[index ..]),
        None => (tail, "/"),
    };
    Some((id.parse().ok()?, rest.to_string()))
}

/// Replaces an unspecified bind address with loopback for client URLs.
fn reachable_addr(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
