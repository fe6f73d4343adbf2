// crates/flag-harness-client/src/commands.rs
// ============================================================================
// Module: Test Service Commands
// Description: Typed command parameters and responses for SDK instances.
// Purpose: Pair every command name with its request and response shapes.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Each command is a serializable parameter struct implementing [`Command`],
//! which names the command and its response type. On the wire a command is the
//! envelope `{"command": <name>, <name>: {params}}` built by [`envelope`].
//! Commands answered with an empty body use [`NoResponse`], which accepts and
//! discards whatever the service returns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::de::IgnoredAny;
use serde_json::Map;
use serde_json::Value;

use crate::error::ClientError;

// ============================================================================
// SECTION: Capabilities
// ============================================================================

/// Capability of server-side SDKs.
pub const CAPABILITY_SERVER_SIDE: &str = "server-side";
/// Capability of client-side SDKs.
pub const CAPABILITY_CLIENT_SIDE: &str = "client-side";
/// Capability for migration commands.
pub const CAPABILITY_MIGRATIONS: &str = "migrations";
/// Capability for big segment store status queries.
pub const CAPABILITY_BIG_SEGMENTS: &str = "big-segments";
/// Capability for `OpenFeature` provider evaluation.
pub const CAPABILITY_OPEN_FEATURE: &str = "open-feature";
/// Capability for evaluation hooks.
pub const CAPABILITY_EVALUATION_HOOKS: &str = "evaluation-hooks";
/// Capability for gzip-compressed event posts.
pub const CAPABILITY_EVENT_GZIP: &str = "event-gzip";
/// Capability for legacy alias events.
pub const CAPABILITY_ALIAS: &str = "alias-event";

// ============================================================================
// SECTION: Command Trait
// ============================================================================

/// A typed test-service command.
pub trait Command: Serialize {
    /// Command name used as the envelope tag.
    const NAME: &'static str;
    /// Parsed response type.
    type Response: DeserializeOwned;

    /// Capability the service must declare for this command.
    fn required_capability() -> Option<&'static str> {
        None
    }
}

/// Builds the wire envelope for a command.
///
/// # Errors
///
/// Returns [`ClientError::Json`] when the parameters fail to serialize.
pub fn envelope<C: Command>(command: &C) -> Result<Value, ClientError> {
    let params = serde_json::to_value(command)
        .map_err(|err| ClientError::Json(format!("{} params: {err}", C::NAME)))?;
    Ok(raw_envelope(C::NAME, params))
}

/// Builds an envelope from a name and already-encoded parameters.
#[must_use]
pub fn raw_envelope(name: &str, params: Value) -> Value {
    let mut envelope = Map::new();
    envelope.insert("command".to_string(), Value::String(name.to_string()));
    envelope.insert(name.to_string(), params);
    Value::Object(envelope)
}

/// Parses a response body; an empty body decodes as JSON `null`.
///
/// # Errors
///
/// Returns [`ClientError::Protocol`] when the body does not match `T`.
pub fn parse_response<T: DeserializeOwned>(name: &str, body: &[u8]) -> Result<T, ClientError> {
    let value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body)
            .map_err(|err| ClientError::Protocol(format!("{name} response is not JSON: {err}")))?
    };
    serde_json::from_value(value)
        .map_err(|err| ClientError::Protocol(format!("unexpected {name} response: {err}")))
}

/// Response of commands that return no meaningful body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoResponse;

impl<'de> Deserialize<'de> for NoResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        IgnoredAny::deserialize(deserializer).map(|_| Self)
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates one flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateFlagParams {
    /// Flag key.
    pub flag_key: String,
    /// Evaluation context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Legacy user, for SDKs that predate contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    /// Expected value type: `bool`, `int`, `double`, `string`, or `any`.
    pub value_type: String,
    /// Value returned when evaluation fails.
    pub default_value: Value,
    /// Whether the detail variant is called.
    #[serde(default)]
    pub detail: bool,
}

impl EvaluateFlagParams {
    /// Builds a non-detail evaluation of `flag_key` for `context`.
    #[must_use]
    pub fn new(flag_key: impl Into<String>, context: Value, default_value: Value) -> Self {
        let value_type = match &default_value {
            Value::Bool(_) => "bool",
            Value::Number(number) if number.is_i64() || number.is_u64() => "int",
            Value::Number(_) => "double",
            Value::String(_) => "string",
            _ => "any",
        };
        Self {
            flag_key: flag_key.into(),
            context: Some(context),
            user: None,
            value_type: value_type.to_string(),
            default_value,
            detail: false,
        }
    }

    /// Requests evaluation detail.
    #[must_use]
    pub fn with_detail(mut self) -> Self {
        self.detail = true;
        self
    }
}

/// Result of one flag evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateFlagResponse {
    /// Evaluated value.
    pub value: Value,
    /// Selected variation, when known.
    #[serde(default)]
    pub variation_index: Option<u64>,
    /// Evaluation reason, for detail evaluations.
    #[serde(default)]
    pub reason: Option<Value>,
}

impl Command for EvaluateFlagParams {
    const NAME: &'static str = "evaluate";
    type Response = EvaluateFlagResponse;
}

/// Evaluates every flag for a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateAllFlagsParams {
    /// Evaluation context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Legacy user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    /// Whether reasons are included.
    #[serde(default)]
    pub with_reasons: bool,
    /// Whether only client-side flags are included.
    #[serde(default)]
    pub client_side_only: bool,
    /// Whether details are limited to tracked flags.
    #[serde(default)]
    pub details_only_for_tracked_flags: bool,
}

/// All-flags state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateAllFlagsResponse {
    /// Serialized flags state.
    pub state: Value,
}

impl Command for EvaluateAllFlagsParams {
    const NAME: &'static str = "evaluateAll";
    type Response = EvaluateAllFlagsResponse;
}

// ============================================================================
// SECTION: Identity and Events
// ============================================================================

/// Switches a client-side SDK to a new context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyParams {
    /// New context.
    pub context: Value,
}

impl Command for IdentifyParams {
    const NAME: &'static str = "identify";
    type Response = NoResponse;

    fn required_capability() -> Option<&'static str> {
        Some(CAPABILITY_CLIENT_SIDE)
    }
}

/// Sends an identify event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyEventParams {
    /// Identified context.
    pub context: Value,
}

impl Command for IdentifyEventParams {
    const NAME: &'static str = "identifyEvent";
    type Response = NoResponse;
}

/// Sends a custom event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEventParams {
    /// Event key.
    pub event_key: String,
    /// Context the event is about.
    pub context: Value,
    /// Attached data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Whether a null `data` is omitted rather than sent.
    #[serde(default)]
    pub omit_null_data: bool,
    /// Numeric metric value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
}

impl Command for CustomEventParams {
    const NAME: &'static str = "customEvent";
    type Response = NoResponse;
}

/// Sends a legacy alias event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasEventParams {
    /// New user.
    pub user: Value,
    /// Previous user.
    pub previous_user: Value,
}

impl Command for AliasEventParams {
    const NAME: &'static str = "aliasEvent";
    type Response = NoResponse;

    fn required_capability() -> Option<&'static str> {
        Some(CAPABILITY_ALIAS)
    }
}

/// Flushes buffered events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushEventsParams {}

impl Command for FlushEventsParams {
    const NAME: &'static str = "flushEvents";
    type Response = NoResponse;
}

// ============================================================================
// SECTION: Migrations
// ============================================================================

/// Reads the migration stage of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationVariationParams {
    /// Migration flag key.
    pub key: String,
    /// Evaluation context.
    pub context: Value,
    /// Stage used when evaluation fails.
    pub default_stage: String,
}

/// Migration stage result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationVariationResponse {
    /// Evaluated stage.
    pub result: String,
}

impl Command for MigrationVariationParams {
    const NAME: &'static str = "migrationVariation";
    type Response = MigrationVariationResponse;

    fn required_capability() -> Option<&'static str> {
        Some(CAPABILITY_MIGRATIONS)
    }
}

/// Runs a migration read or write against two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOperationParams {
    /// Migration flag key.
    pub key: String,
    /// Evaluation context.
    pub context: Value,
    /// Stage used when evaluation fails.
    pub default_stage: String,
    /// `read` or `write`.
    pub operation: String,
    /// `serial`, `random`, or `concurrent`.
    pub read_execution_order: String,
    /// Whether latency is tracked.
    #[serde(default)]
    pub track_latency: bool,
    /// Whether errors are tracked.
    #[serde(default)]
    pub track_errors: bool,
    /// Whether read consistency is checked.
    #[serde(default)]
    pub track_consistency: bool,
    /// URL of the old implementation.
    pub old_endpoint: String,
    /// URL of the new implementation.
    pub new_endpoint: String,
    /// Payload sent to the endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Migration operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOperationResponse {
    /// Authoritative result.
    #[serde(default)]
    pub result: Value,
    /// Failure message, when the operation failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl Command for MigrationOperationParams {
    const NAME: &'static str = "migrationOperation";
    type Response = MigrationOperationResponse;

    fn required_capability() -> Option<&'static str> {
        Some(CAPABILITY_MIGRATIONS)
    }
}

// ============================================================================
// SECTION: Providers, Stores, Hooks
// ============================================================================

/// Evaluates a flag through the `OpenFeature` provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFeatureEvaluateParams {
    /// Flag key.
    pub flag_key: String,
    /// Expected value type.
    pub value_type: String,
    /// Default value.
    pub default_value: Value,
    /// `OpenFeature` evaluation context.
    pub context: Value,
}

/// `OpenFeature` resolution details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFeatureEvaluateResponse {
    /// Resolved value.
    pub value: Value,
    /// Resolution reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Variant label.
    #[serde(default)]
    pub variant: Option<String>,
    /// Error code, when resolution failed.
    #[serde(default)]
    pub error_code: Option<String>,
}

impl Command for OpenFeatureEvaluateParams {
    const NAME: &'static str = "openFeatureEvaluate";
    type Response = OpenFeatureEvaluateResponse;

    fn required_capability() -> Option<&'static str> {
        Some(CAPABILITY_OPEN_FEATURE)
    }
}

/// Queries the big segment store status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigSegmentStoreStatusParams {}

/// Big segment store status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigSegmentStoreStatusResponse {
    /// Whether the store is reachable.
    pub available: bool,
    /// Whether the store data is stale.
    pub stale: bool,
}

impl Command for BigSegmentStoreStatusParams {
    const NAME: &'static str = "getBigSegmentStoreStatus";
    type Response = BigSegmentStoreStatusResponse;

    fn required_capability() -> Option<&'static str> {
        Some(CAPABILITY_BIG_SEGMENTS)
    }
}

/// Asks the service which stages a configured hook has executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookQueryParams {
    /// Hook instance name.
    pub hook_name: String,
}

/// Hook execution summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookQueryResponse {
    /// Stage names executed so far, in order.
    #[serde(default)]
    pub stages: Vec<String>,
}

impl Command for HookQueryParams {
    const NAME: &'static str = "hookQuery";
    type Response = HookQueryResponse;

    fn required_capability() -> Option<&'static str> {
        Some(CAPABILITY_EVALUATION_HOOKS)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
