// system-tests/tests/helpers/stub_sdk.rs
// ============================================================================
// Module: Reference Test Service
// Description: In-process SDK stand-in speaking the test service protocol.
// Purpose: Give conformance suites a well-behaved SDK to drive end to end.
// Dependencies: axum, flate2, reqwest, tokio, flag-harness-client, flag-harness-core
// ============================================================================

//! ## Overview
//! [`StubSdk`] behaves like a minimal SDK of one [`SdkKind`] wrapped by a
//! test service. Each created instance runs one data source task that follows
//! the consumer contract: stream frames are classified, changes are buffered
//! until `payload-transferred`, malformed frames drop the connection,
//! recoverable failures are retried after the configured delay, and
//! unrecoverable ones stop the data source. Requests follow the kind table, so
//! client-side kinds send their context in the path or a `REPORT` body and
//! skip `Authorization`. Commands evaluate against the committed store, buffer
//! analytics events, and call configured hooks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
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
use flag_harness_client::CustomEventParams;
use flag_harness_client::EvaluateAllFlagsParams;
use flag_harness_client::EvaluateAllFlagsResponse;
use flag_harness_client::EvaluateFlagParams;
use flag_harness_client::EvaluateFlagResponse;
use flag_harness_client::HookQueryParams;
use flag_harness_client::HookQueryResponse;
use flag_harness_client::IdentifyEventParams;
use flag_harness_client::IdentifyParams;
use flag_harness_client::SdkConfigParams;
use flag_harness_core::EntityKind;
use flag_harness_core::ErrorClass;
use flag_harness_core::FlagQuery;
use flag_harness_core::FlagRequestMethod;
use flag_harness_core::FrameDisposition;
use flag_harness_core::IntentCode;
use flag_harness_core::ItemChange;
use flag_harness_core::ProtocolFrame;
use flag_harness_core::SdkKind;
use flag_harness_core::SseDecoder;
use flag_harness_core::StreamFrame;
use flag_harness_core::StreamProtocol;
use flag_harness_core::VersionStore;
use flag_harness_core::classify_frame;
use flag_harness_core::classify_status;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capabilities the stub declares when running as a server-side SDK.
pub const CAPABILITIES: [&str; 3] = ["server-side", "evaluation-hooks", "event-gzip"];

/// Capabilities the stub declares when running as a client-side SDK.
pub const CLIENT_CAPABILITIES: [&str; 3] = ["client-side", "evaluation-hooks", "event-gzip"];

/// Reconnect delay when the configuration names none.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Poll interval when the configuration names none.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Initialization wait when the configuration names none.
const DEFAULT_START_WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Service
// ============================================================================

/// Running reference test service.
pub struct StubSdk {
    /// Base URL without trailing slash.
    url: String,
    /// Shared service state.
    state: Arc<StubState>,
    /// Listener task.
    task: JoinHandle<()>,
}

impl StubSdk {
    /// Starts a server-side service on an ephemeral loopback port.
    pub async fn start() -> Result<Self, String> {
        Self::start_as(SdkKind::Server).await
    }

    /// Starts a service behaving as `kind`.
    pub async fn start_as(kind: SdkKind) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| err.to_string())?;
        let state = Arc::new(StubState {
            kind,
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            http,
        });
        let app = Router::new()
            .route("/", get(status).post(create))
            .route("/clients/{id}", post(command).delete(delete))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|err| format!("stub bind failed: {err}"))?;
        let url = format!(
            "http://{}",
            listener.local_addr().map_err(|err| format!("stub address failed: {err}"))?
        );
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            url,
            state,
            task,
        })
    }

    /// Returns the service base URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the number of live instances.
    pub fn instance_count(&self) -> usize {
        self.state.instances.lock().map(|instances| instances.len()).unwrap_or_default()
    }
}

impl Drop for StubSdk {
    fn drop(&mut self) {
        self.task.abort();
        if let Ok(mut instances) = self.state.instances.lock() {
            for (_, instance) in instances.drain() {
                instance.stop();
            }
        }
    }
}

/// Shared service state.
struct StubState {
    /// SDK kind every instance behaves as.
    kind: SdkKind,
    /// Live instances by id.
    instances: Mutex<HashMap<usize, Arc<Instance>>>,
    /// Next instance id.
    next_id: AtomicUsize,
    /// HTTP client used by every instance.
    http: reqwest::Client,
}

impl StubState {
    /// Looks up an instance.
    fn instance(&self, id: usize) -> Option<Arc<Instance>> {
        self.instances.lock().ok()?.get(&id).cloned()
    }
}

// ============================================================================
// SECTION: Protocol Handlers
// ============================================================================

/// Create-instance body.
#[derive(Deserialize)]
struct CreateBody {
    /// Instance tag.
    tag: String,
    /// SDK configuration.
    configuration: SdkConfigParams,
}

/// Initialization progress of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    /// No payload committed yet.
    Pending,
    /// First payload committed.
    Ready,
    /// Data source gave up.
    Failed,
}

async fn status(State(state): State<Arc<StubState>>) -> Json<Value> {
    let capabilities =
        if state.kind.is_client_side() { CLIENT_CAPABILITIES } else { CAPABILITIES };
    Json(json!({
        "name": format!("reference-{}-sdk", state.kind),
        "clientVersion": "1.0.0",
        "capabilities": capabilities,
    }))
}

async fn create(State(state): State<Arc<StubState>>, Json(body): Json<CreateBody>) -> Response {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let init_can_fail = body.configuration.init_can_fail;
    let instance = Arc::new(Instance::new(body.tag, state.kind, body.configuration));
    let outcome = start_data_source(&instance, &state.http).await;
    if outcome != InitState::Ready && !init_can_fail {
        instance.stop();
        return (StatusCode::INTERNAL_SERVER_ERROR, "sdk failed to initialize").into_response();
    }
    if let Ok(mut instances) = state.instances.lock() {
        instances.insert(id, instance);
    }
    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/clients/{id}").parse() {
        headers.insert(LOCATION, location);
    }
    (StatusCode::CREATED, headers).into_response()
}

async fn delete(State(state): State<Arc<StubState>>, Path(id): Path<usize>) -> StatusCode {
    let removed = state.instances.lock().ok().and_then(|mut instances| instances.remove(&id));
    match removed {
        Some(instance) => {
            instance.stop();
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn command(
    State(state): State<Arc<StubState>>,
    Path(id): Path<usize>,
    Json(body): Json<Value>,
) -> Response {
    let Some(instance) = state.instance(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let name = body["command"].as_str().unwrap_or_default().to_string();
    let params = body.get(name.as_str()).cloned().unwrap_or(Value::Null);
    match dispatch(&instance, &state.http, &name, params).await {
        Ok(response) => response,
        Err(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}

/// Runs one command against an instance.
async fn dispatch(
    instance: &Arc<Instance>,
    http: &reqwest::Client,
    name: &str,
    params: Value,
) -> Result<Response, String> {
    let response = match name {
        "identify" if instance.kind.is_client_side() => {
            let params: IdentifyParams = decode(params)?;
            instance.identify(http, params.context).await?;
            StatusCode::ACCEPTED.into_response()
        }
        "evaluate" => {
            let params: EvaluateFlagParams = decode(params)?;
            Json(instance.evaluate(http, &params).await).into_response()
        }
        "evaluateAll" => {
            let params: EvaluateAllFlagsParams = decode(params)?;
            Json(instance.evaluate_all(&params)).into_response()
        }
        "identifyEvent" => {
            let params: IdentifyEventParams = decode(params)?;
            instance.record_identify(params.context);
            StatusCode::ACCEPTED.into_response()
        }
        "customEvent" => {
            let params: CustomEventParams = decode(params)?;
            instance.record_custom(http, params).await;
            StatusCode::ACCEPTED.into_response()
        }
        "flushEvents" => {
            instance.flush(http).await?;
            StatusCode::ACCEPTED.into_response()
        }
        "hookQuery" => {
            let params: HookQueryParams = decode(params)?;
            Json(instance.hook_stages(&params.hook_name)).into_response()
        }
        other => return Err(format!("unsupported command {other}")),
    };
    Ok(response)
}

/// Decodes command parameters.
fn decode<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|err| format!("invalid command params: {err}"))
}

// ============================================================================
// SECTION: Instance
// ============================================================================

/// One SDK instance.
struct Instance {
    /// Instance tag.
    tag: String,
    /// SDK kind this instance behaves as.
    kind: SdkKind,
    /// Configuration from the create call.
    config: SdkConfigParams,
    /// Current evaluation context of a client-side instance.
    context: Mutex<Value>,
    /// Committed flag and segment store.
    store: Mutex<VersionStore>,
    /// State id of the last committed payload.
    basis: Mutex<Option<String>>,
    /// Buffered analytics events.
    events: Mutex<Vec<Value>>,
    /// Evaluation counts per flag key since the last flush.
    summary: Mutex<BTreeMap<String, u64>>,
    /// Context keys already indexed.
    indexed: Mutex<BTreeSet<String>>,
    /// Stages executed per hook name.
    hook_stages: Mutex<BTreeMap<String, Vec<String>>>,
    /// Flush counter used for payload ids.
    flushes: AtomicU64,
    /// Data source task.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Instance {
    fn new(tag: String, kind: SdkKind, config: SdkConfigParams) -> Self {
        let context = config
            .client_side
            .as_ref()
            .and_then(|client_side| client_side.initial_context.clone())
            .unwrap_or(Value::Null);
        Self {
            tag,
            kind,
            config,
            context: Mutex::new(context),
            store: Mutex::new(VersionStore::new()),
            basis: Mutex::new(None),
            events: Mutex::new(Vec::new()),
            summary: Mutex::new(BTreeMap::new()),
            indexed: Mutex::new(BTreeSet::new()),
            hook_stages: Mutex::new(BTreeMap::new()),
            flushes: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    fn set_task(&self, task: JoinHandle<()>) {
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
    }

    /// Stops the data source, closing any open stream.
    fn stop(&self) {
        if let Some(task) = self.task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }
    }

    fn basis(&self) -> Option<String> {
        self.basis.lock().ok().and_then(|basis| basis.clone())
    }

    fn context(&self) -> Value {
        self.context.lock().map(|context| context.clone()).unwrap_or(Value::Null)
    }

    /// Switches a client-side instance to `context` and reloads its flags.
    async fn identify(self: &Arc<Self>, http: &reqwest::Client, context: Value) -> Result<(), String> {
        self.stop();
        if let Ok(mut current) = self.context.lock() {
            *current = context.clone();
        }
        if let Ok(mut basis) = self.basis.lock() {
            *basis = None;
        }
        self.record_identify(context);
        match start_data_source(self, http).await {
            InitState::Ready => Ok(()),
            InitState::Pending | InitState::Failed => {
                Err("data source did not reload after identify".to_string())
            }
        }
    }

    /// Commits a payload: a full transfer replaces the store wholesale.
    fn commit(&self, full: bool, changes: Vec<ItemChange>, state: Option<String>) {
        if let Ok(mut store) = self.store.lock() {
            if full {
                *store = VersionStore::from_changes(changes);
            } else {
                for change in &changes {
                    store.apply(change);
                }
            }
        }
        if let Some(state) = state
            && let Ok(mut basis) = self.basis.lock()
        {
            *basis = Some(state);
        }
    }

    fn apply_now(&self, change: &ItemChange) {
        if let Ok(mut store) = self.store.lock() {
            store.apply(change);
        }
    }

    /// Evaluates a flag against the committed store.
    fn resolve(&self, key: &str, default: &Value) -> EvaluateFlagResponse {
        let flag = self.store.lock().ok().and_then(|store| store.get(EntityKind::Flag, key).cloned());
        let Some(flag) = flag else {
            return EvaluateFlagResponse {
                value: default.clone(),
                variation_index: None,
                reason: Some(json!({ "kind": "ERROR", "errorKind": "FLAG_NOT_FOUND" })),
            };
        };
        if self.kind.is_client_side() {
            return EvaluateFlagResponse {
                value: flag.get("value").cloned().unwrap_or_else(|| default.clone()),
                variation_index: flag["variation"].as_u64(),
                reason: flag.get("reason").cloned(),
            };
        }
        let on = flag["on"].as_bool().unwrap_or(false);
        let (index, reason) = if on {
            (flag["fallthrough"]["variation"].as_u64(), json!({ "kind": "FALLTHROUGH" }))
        } else {
            (flag["offVariation"].as_u64(), json!({ "kind": "OFF" }))
        };
        let value = index
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| flag["variations"].get(index).cloned());
        match value {
            Some(value) => EvaluateFlagResponse {
                value,
                variation_index: index,
                reason: Some(reason),
            },
            None => EvaluateFlagResponse {
                value: default.clone(),
                variation_index: None,
                reason: Some(reason),
            },
        }
    }

    async fn evaluate(&self, http: &reqwest::Client, params: &EvaluateFlagParams) -> EvaluateFlagResponse {
        let context = params.context.clone().unwrap_or(Value::Null);
        let method = if params.detail { "variationDetail" } else { "variation" };
        let series = json!({
            "flagKey": params.flag_key,
            "context": context,
            "defaultValue": params.default_value,
            "method": method,
        });
        self.run_hooks(http, "beforeEvaluation", json!({ "evaluationSeriesContext": series }))
            .await;
        let mut result = self.resolve(&params.flag_key, &params.default_value);
        self.index_context(&context);
        if let Ok(mut summary) = self.summary.lock() {
            *summary.entry(params.flag_key.clone()).or_default() += 1;
        }
        self.run_hooks(
            http,
            "afterEvaluation",
            json!({
                "evaluationSeriesContext": series,
                "evaluationDetail": { "value": result.value, "reason": result.reason },
            }),
        )
        .await;
        if !params.detail {
            result.reason = None;
        }
        result
    }

    fn evaluate_all(&self, params: &EvaluateAllFlagsParams) -> EvaluateAllFlagsResponse {
        let keys: Vec<String> = self
            .store
            .lock()
            .map(|store| {
                store
                    .live_items()
                    .filter(|(kind, ..)| *kind == EntityKind::Flag)
                    .map(|(_, key, ..)| key.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let mut state = serde_json::Map::new();
        for key in keys {
            let result = self.resolve(&key, &Value::Null);
            state.insert(key, result.value);
        }
        if params.with_reasons {
            state.insert("$valid".to_string(), Value::Bool(true));
        }
        EvaluateAllFlagsResponse {
            state: Value::Object(state),
        }
    }

    fn push_event(&self, event: Value) {
        if self.config.events.is_none() {
            return;
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Emits an index event the first time a context key is seen.
    fn index_context(&self, context: &Value) {
        let Some(key) = context["key"].as_str() else {
            return;
        };
        let first = self.indexed.lock().map(|mut seen| seen.insert(key.to_string())).unwrap_or(false);
        if first {
            self.push_event(json!({ "kind": "index", "context": context }));
        }
    }

    fn record_identify(&self, context: Value) {
        self.push_event(json!({ "kind": "identify", "context": context }));
    }

    async fn record_custom(&self, http: &reqwest::Client, params: CustomEventParams) {
        self.index_context(&params.context);
        let mut event = json!({
            "kind": "custom",
            "key": params.event_key,
            "context": params.context,
        });
        if let Some(data) = params.data
            && !(params.omit_null_data && data.is_null())
        {
            event["data"] = data;
        }
        if let Some(metric) = params.metric_value {
            event["metricValue"] = json!(metric);
        }
        self.push_event(event);
        self.run_hooks(http, "afterTrack", json!({ "trackSeriesContext": { "key": params.event_key } }))
            .await;
    }

    /// Posts buffered events plus a summary as one payload.
    async fn flush(&self, http: &reqwest::Client) -> Result<(), String> {
        let Some(events_config) = &self.config.events else {
            return Ok(());
        };
        let Some(base_uri) = &events_config.base_uri else {
            return Ok(());
        };
        let mut payload = self.events.lock().map(|mut events| std::mem::take(&mut *events)).unwrap_or_default();
        let summary = self.summary.lock().map(|mut summary| std::mem::take(&mut *summary)).unwrap_or_default();
        if !summary.is_empty() {
            let features: serde_json::Map<String, Value> = summary
                .into_iter()
                .map(|(key, count)| (key, json!({ "counters": [{ "count": count }] })))
                .collect();
            payload.push(json!({ "kind": "summary", "features": features }));
        }
        if payload.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(&payload).map_err(|err| err.to_string())?;
        let flush = self.flushes.fetch_add(1, Ordering::Relaxed);
        let mut request = http
            .post(format!("{}/bulk", base_uri.trim_end_matches('/')))
            .header("Authorization", self.config.credential.as_str())
            .header("Content-Type", "application/json")
            .header("X-LaunchDarkly-Payload-Id", format!("{}-{flush}", self.tag));
        let body = if events_config.enable_gzip {
            request = request.header("Content-Encoding", "gzip");
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body).map_err(|err| err.to_string())?;
            encoder.finish().map_err(|err| err.to_string())?
        } else {
            body
        };
        let response = request.body(body).send().await.map_err(|err| err.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("event post returned {}", response.status()))
        }
    }

    /// Posts one stage call to every configured hook.
    async fn run_hooks(&self, http: &reqwest::Client, stage: &str, data: Value) {
        let Some(hooks) = &self.config.hooks else {
            return;
        };
        for hook in &hooks.hooks {
            let mut payload = data.clone();
            payload["stage"] = Value::String(stage.to_string());
            if let Some(extra) = hook.data.as_ref().and_then(|data| data.get(stage)) {
                payload["hookData"] = extra.clone();
            }
            let _ = http.post(&hook.callback_uri).json(&payload).send().await;
            if let Ok(mut stages) = self.hook_stages.lock() {
                stages.entry(hook.name.clone()).or_default().push(stage.to_string());
            }
        }
    }

    fn hook_stages(&self, name: &str) -> HookQueryResponse {
        let stages = self
            .hook_stages
            .lock()
            .ok()
            .and_then(|stages| stages.get(name).cloned())
            .unwrap_or_default();
        HookQueryResponse {
            stages,
        }
    }
}

// ============================================================================
// SECTION: Data Source
// ============================================================================

/// Buffers changes of one payload until it is committed.
#[derive(Default)]
struct FrameReceiver {
    /// Intent of the payload in progress.
    intent: Option<IntentCode>,
    /// Changes awaiting `payload-transferred`.
    pending: Vec<ItemChange>,
}

impl FrameReceiver {
    /// Handles one valid frame; returns true when data was committed.
    fn accept(&mut self, instance: &Instance, frame: ProtocolFrame) -> bool {
        match frame {
            ProtocolFrame::ServerIntent(intent) => {
                self.pending.clear();
                if intent.code == IntentCode::None {
                    self.intent = Some(IntentCode::TransferChanges);
                    return true;
                }
                self.intent = Some(intent.code);
                false
            }
            ProtocolFrame::Change(change) => {
                self.pending.push(change);
                false
            }
            ProtocolFrame::PayloadTransferred(selector) => {
                let full = self.intent == Some(IntentCode::TransferFull);
                instance.commit(full, std::mem::take(&mut self.pending), Some(selector.state));
                self.intent = Some(IntentCode::TransferChanges);
                true
            }
            ProtocolFrame::Heartbeat => false,
            ProtocolFrame::Goodbye(_) | ProtocolFrame::Error { .. } => {
                self.pending.clear();
                false
            }
            ProtocolFrame::LegacyPut(changes) => {
                instance.commit(true, changes, None);
                true
            }
            ProtocolFrame::LegacyChange(change) => {
                instance.apply_now(&change);
                false
            }
        }
    }
}

/// Result of one connection attempt.
enum Attempt {
    /// Retry after the delay.
    Retry,
    /// Stop the data source.
    Stop,
}

/// Spawns the data source and waits for it to settle within the start wait.
async fn start_data_source(instance: &Arc<Instance>, http: &reqwest::Client) -> InitState {
    let start_wait =
        instance.config.start_wait_time_ms.map_or(DEFAULT_START_WAIT, Duration::from_millis);
    let (init_tx, mut init_rx) = watch::channel(InitState::Pending);
    let task = tokio::spawn(run_data_source(Arc::clone(instance), http.clone(), init_tx));
    instance.set_task(task);
    let settled = tokio::time::timeout(start_wait, async {
        init_rx.wait_for(|progress| *progress != InitState::Pending).await.map(|progress| *progress)
    })
    .await;
    match settled {
        Ok(Ok(progress)) => progress,
        _ => InitState::Pending,
    }
}

/// Runs the configured data source until stopped.
async fn run_data_source(
    instance: Arc<Instance>,
    http: reqwest::Client,
    init: watch::Sender<InitState>,
) {
    let streaming = instance.config.streaming.clone();
    let polling = instance.config.polling.clone();
    let (delay, base, poll) = match (streaming, polling) {
        (Some(streaming), _) => (
            streaming.initial_retry_delay_ms.map_or(DEFAULT_RETRY_DELAY, Duration::from_millis),
            streaming.base_uri.unwrap_or_default(),
            false,
        ),
        (None, Some(polling)) => (
            polling.poll_interval_ms.map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
            polling.base_uri.unwrap_or_default(),
            true,
        ),
        (None, None) => {
            init.send_replace(InitState::Failed);
            return;
        }
    };
    let base = base.trim_end_matches('/').to_string();
    let client_side = instance.config.client_side.clone().unwrap_or_default();
    let method = if client_side.use_report.unwrap_or(false) {
        FlagRequestMethod::Report
    } else {
        FlagRequestMethod::Get
    };
    let Ok(report) = reqwest::Method::from_bytes(FlagRequestMethod::Report.as_str().as_bytes())
    else {
        init.send_replace(InitState::Failed);
        return;
    };
    loop {
        let context = instance.context();
        let basis = instance.basis();
        let query = FlagQuery {
            method,
            env: &instance.config.credential,
            context: &context,
            with_reasons: client_side.evaluation_reasons.unwrap_or(false),
            basis: basis.as_deref(),
        };
        let target = if poll {
            instance.kind.poll_request(StreamProtocol::Versioned, &query)
        } else {
            instance.kind.stream_request(StreamProtocol::Versioned, &query)
        };
        let url = format!("{base}{}", target.path);
        let mut request = match (&target.method, &target.body) {
            (FlagRequestMethod::Report, Some(body)) => http.request(report.clone(), &url).json(body),
            _ => http.get(&url),
        };
        if instance.kind.requires_auth() {
            request = request.header("Authorization", instance.config.credential.as_str());
        }
        let attempt = match request.send().await {
            Err(_) => Attempt::Retry,
            Ok(response) => match classify_status(response.status().as_u16()) {
                Some(ErrorClass::Unrecoverable) => Attempt::Stop,
                Some(ErrorClass::Recoverable) => Attempt::Retry,
                None if poll => {
                    read_poll(&instance, response, &init).await;
                    Attempt::Retry
                }
                None => {
                    read_stream(&instance, response, &init).await;
                    Attempt::Retry
                }
            },
        };
        if matches!(attempt, Attempt::Stop) {
            init.send_if_modified(|progress| {
                if *progress == InitState::Pending {
                    *progress = InitState::Failed;
                    return true;
                }
                false
            });
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

/// Marks the data source initialized.
fn mark_ready(init: &watch::Sender<InitState>) {
    init.send_if_modified(|progress| {
        if *progress == InitState::Ready {
            return false;
        }
        *progress = InitState::Ready;
        true
    });
}

/// Consumes a stream until it ends or delivers a malformed frame.
async fn read_stream(instance: &Instance, mut response: reqwest::Response, init: &watch::Sender<InitState>) {
    let mut decoder = SseDecoder::new();
    let mut receiver = FrameReceiver::default();
    while let Ok(Some(chunk)) = response.chunk().await {
        for event in decoder.push(&chunk) {
            match classify_frame(&event.event, &event.data) {
                FrameDisposition::Apply(frame) => {
                    if receiver.accept(instance, frame) {
                        mark_ready(init);
                    }
                }
                FrameDisposition::Ignore => {}
                FrameDisposition::Reconnect(_) => return,
            }
        }
    }
}

/// Applies one poll response.
async fn read_poll(instance: &Instance, response: reqwest::Response, init: &watch::Sender<InitState>) {
    let Ok(body) = response.json::<Value>().await else {
        return;
    };
    let mut receiver = FrameReceiver::default();
    let entries = body["events"].as_array().cloned().unwrap_or_default();
    for entry in &entries {
        let Ok(frame) = StreamFrame::from_poll_entry(entry) else {
            return;
        };
        match classify_frame(&frame.name, &frame.data) {
            FrameDisposition::Apply(frame) => {
                if receiver.accept(instance, frame) {
                    mark_ready(init);
                }
            }
            FrameDisposition::Ignore => {}
            FrameDisposition::Reconnect(_) => return,
        }
    }
}
