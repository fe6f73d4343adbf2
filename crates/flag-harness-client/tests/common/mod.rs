// crates/flag-harness-client/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: In-process stub of an SDK test service.
// Purpose: Observe exactly what the client sends over HTTP.
// Dependencies: axum, serde_json, tokio
// ============================================================================

//! ## Overview
//! [`StubService`] answers the test service protocol with canned responses
//! and records every create, command, and delete it receives.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;

/// Default wait used by tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Everything the stub has received.
#[derive(Default)]
pub struct StubLedger {
    /// Create requests in arrival order.
    pub created: Vec<Value>,
    /// `(instance id, envelope)` pairs in arrival order.
    pub commands: Vec<(usize, Value)>,
    /// Deleted instance ids.
    pub deleted: Vec<usize>,
}

/// Shared stub state.
#[derive(Clone)]
struct StubState {
    capabilities: Vec<String>,
    ledger: Arc<Mutex<StubLedger>>,
}

/// Running stub service.
pub struct StubService {
    /// Base URL without trailing slash.
    pub url: String,
    ledger: Arc<Mutex<StubLedger>>,
    task: tokio::task::JoinHandle<()>,
}

impl StubService {
    /// Starts a stub declaring `capabilities`.
    pub async fn start(capabilities: &[&str]) -> Self {
        let ledger = Arc::new(Mutex::new(StubLedger::default()));
        let state = StubState {
            capabilities: capabilities.iter().map(ToString::to_string).collect(),
            ledger: Arc::clone(&ledger),
        };
        let app = Router::new()
            .route("/", get(status).post(create))
            .route("/clients/{id}", post(command).delete(delete))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url,
            ledger,
            task,
        }
    }

    /// Runs `read` against the ledger.
    pub fn ledger<T>(&self, read: impl FnOnce(&StubLedger) -> T) -> T {
        read(&self.ledger.lock().unwrap())
    }

    /// Waits until `predicate` holds for the ledger.
    pub async fn wait_for(&self, predicate: impl Fn(&StubLedger) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.ledger(&predicate) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for StubService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn status(State(state): State<StubState>) -> Json<Value> {
    Json(json!({
        "name": "stub-sdk",
        "clientVersion": "0.0.1",
        "capabilities": state.capabilities,
    }))
}

async fn create(State(state): State<StubState>, Json(body): Json<Value>) -> Response {
    let mut ledger = state.ledger.lock().unwrap();
    ledger.created.push(body);
    let id = ledger.created.len() - 1;
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, format!("/clients/{id}").parse().unwrap());
    (StatusCode::CREATED, headers).into_response()
}

async fn command(
    State(state): State<StubState>,
    Path(id): Path<usize>,
    Json(body): Json<Value>,
) -> Response {
    state.ledger.lock().unwrap().commands.push((id, body.clone()));
    let name = body["command"].as_str().unwrap_or_default().to_string();
    let params = &body[name.as_str()];
    match name.as_str() {
        "evaluate" => Json(json!({
            "value": params["defaultValue"],
            "variationIndex": 0,
            "reason": { "kind": "FALLTHROUGH" },
        }))
        .into_response(),
        "evaluateAll" => Json(json!({ "state": { "flag-a": true } })).into_response(),
        "migrationVariation" => Json(json!({ "result": params["defaultStage"] })).into_response(),
        "hookQuery" => Json(json!({ "stages": ["beforeEvaluation"] })).into_response(),
        "huge" => "x".repeat(4096).into_response(),
        "fail" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "garbled" => "{not json".into_response(),
        _ => StatusCode::ACCEPTED.into_response(),
    }
}

async fn delete(State(state): State<StubState>, Path(id): Path<usize>) -> StatusCode {
    state.ledger.lock().unwrap().deleted.push(id);
    StatusCode::NO_CONTENT
}
