// crates/flag-harness-mock/src/hooks.rs
// ============================================================================
// Module: Hook Callback Service
// Description: Per-instance callback endpoints for SDK evaluation hooks.
// Purpose: Queue hook executions and support multi-instance composite waits.
// Dependencies: axum, serde, tokio
// ============================================================================

//! ## Overview
//! Each named hook instance gets its own endpoint and queue. The SDK's test
//! service posts one [`HookExecutionPayload`] per stage execution to the
//! instance's callback URI. [`HookCallbackService::await_calls_from_each`]
//! waits for at least one call from every named instance concurrently, each
//! wait bounded by the same timeout independently.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use flag_harness_core::HarnessLogEvent;
use flag_harness_core::SharedLogSink;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::endpoint::CancelSignal;
use crate::endpoint::Endpoint;
use crate::endpoint::RequestRecord;
use crate::error::MockError;
use crate::handler::EndpointHandler;
use crate::queue::BlockingQueue;
use crate::server::MockServerHandle;

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Hook stage reported by a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookStage {
    /// Before a flag evaluation.
    BeforeEvaluation,
    /// After a flag evaluation.
    AfterEvaluation,
    /// After an event is tracked.
    AfterTrack,
    /// Any stage this harness does not know.
    #[serde(other)]
    Unknown,
}

impl HookStage {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeEvaluation => "beforeEvaluation",
            Self::AfterEvaluation => "afterEvaluation",
            Self::AfterTrack => "afterTrack",
            Self::Unknown => "unknown",
        }
    }
}

/// One hook execution reported by the test service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookExecutionPayload {
    /// Stage that executed.
    pub stage: HookStage,
    /// Remaining payload fields (evaluation series context, data, result).
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Queue receiving one instance's callbacks.
struct HookInstance {
    /// Instance name.
    name: String,
    /// Received executions.
    calls: BlockingQueue<HookExecutionPayload>,
    /// Log sink.
    log: SharedLogSink,
}

/// Registered instance: shared queue plus its endpoint.
struct RegisteredHook {
    /// Shared queue.
    instance: Arc<HookInstance>,
    /// Callback endpoint.
    endpoint: Endpoint,
}

/// Callback endpoints for named hook instances.
pub struct HookCallbackService {
    /// Server used to register endpoints.
    server: MockServerHandle,
    /// Instances by name.
    hooks: BTreeMap<String, RegisteredHook>,
}

impl HookCallbackService {
    /// Creates an empty service.
    #[must_use]
    pub fn new(server: MockServerHandle) -> Self {
        Self {
            server,
            hooks: BTreeMap::new(),
        }
    }

    /// Registers a hook instance and returns its callback URI.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the name is already registered.
    pub fn add_hook(&mut self, name: &str) -> Result<String, MockError> {
        if self.hooks.contains_key(name) {
            return Err(MockError::Wiring(format!("hook {name} is already registered")));
        }
        let instance = Arc::new(HookInstance {
            name: name.to_string(),
            calls: BlockingQueue::new(),
            log: self.server.log(),
        });
        let endpoint = self.server.register(Arc::clone(&instance) as Arc<dyn EndpointHandler>);
        let uri = endpoint.base_url().to_string();
        self.hooks.insert(
            name.to_string(),
            RegisteredHook {
                instance,
                endpoint,
            },
        );
        Ok(uri)
    }

    /// Callback URI of a registered instance.
    #[must_use]
    pub fn callback_uri(&self, name: &str) -> Option<&str> {
        self.hooks.get(name).map(|hook| hook.endpoint.base_url())
    }

    /// Registered instance names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.hooks.keys().cloned().collect()
    }

    /// Waits up to `timeout` for the next call to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] for an unknown name and
    /// [`MockError::Timeout`] when no call arrives.
    pub async fn await_call(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<HookExecutionPayload, MockError> {
        let instance = self.instance(name)?;
        instance
            .calls
            .pop(timeout)
            .await
            .ok_or_else(|| MockError::timeout(format!("call to hook {name}"), timeout))
    }

    /// Waits for at least one call from each named instance, concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] for an unknown name and
    /// [`MockError::Timeout`] naming every instance that stayed silent.
    pub async fn await_calls_from_each(
        &self,
        names: &[&str],
        timeout: Duration,
    ) -> Result<BTreeMap<String, HookExecutionPayload>, MockError> {
        let mut waits = JoinSet::new();
        for name in names {
            let instance = Arc::clone(self.instance(name)?);
            waits.spawn(async move {
                let call = instance.calls.pop(timeout).await;
                (instance.name.clone(), call)
            });
        }
        let mut calls = BTreeMap::new();
        let mut silent = Vec::new();
        while let Some(joined) = waits.join_next().await {
            let (name, call) =
                joined.map_err(|err| MockError::Wiring(format!("hook wait task failed: {err}")))?;
            match call {
                Some(call) => {
                    calls.insert(name, call);
                }
                None => silent.push(name),
            }
        }
        if silent.is_empty() {
            Ok(calls)
        } else {
            silent.sort();
            Err(MockError::timeout(format!("calls from hooks {}", silent.join(", ")), timeout))
        }
    }

    /// Fails if `name` receives a call within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] for an unknown name and
    /// [`MockError::Unexpected`] when a call arrives.
    pub async fn expect_no_call(&self, name: &str, timeout: Duration) -> Result<(), MockError> {
        let instance = self.instance(name)?;
        instance.calls.expect_empty(timeout).await.map_err(|call| MockError::Unexpected {
            what: format!("call to hook {name}"),
            detail: format!("stage {}", call.stage.as_str()),
        })
    }

    /// Looks up an instance.
    fn instance(&self, name: &str) -> Result<&Arc<HookInstance>, MockError> {
        self.hooks
            .get(name)
            .map(|hook| &hook.instance)
            .ok_or_else(|| MockError::Wiring(format!("hook {name} is not registered")))
    }
}

// ============================================================================
// SECTION: Handler
// ============================================================================

#[async_trait]
impl EndpointHandler for HookInstance {
    async fn serve(&self, request: RequestRecord, _cancel: CancelSignal) -> Response {
        let payload = request.body_json().and_then(|value| {
            serde_json::from_value::<HookExecutionPayload>(value)
                .map_err(|err| MockError::Decode(err.to_string()))
        });
        match payload {
            Ok(payload) => {
                self.log.record(
                    &HarnessLogEvent::new("hook_call", "hooks", request.describe())
                        .scope(self.name.clone()),
                );
                self.calls.push(payload);
                StatusCode::OK.into_response()
            }
            Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        }
    }
}
