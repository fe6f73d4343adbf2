// crates/flag-harness-client/src/params.rs
// ============================================================================
// Module: SDK Configuration Record
// Description: Serializable configuration sent with a create-instance call.
// Purpose: Describe how a test service should configure one SDK instance.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`SdkConfigParams`] is the record a configurer chain mutates. Its default
//! is the zero value: no credential and no sub-records. Absent sub-records are
//! omitted from the wire form so the SDK keeps its own defaults for them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Record
// ============================================================================

/// Top-level SDK configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfigParams {
    /// SDK key, mobile key, or client-side id.
    pub credential: String,
    /// Maximum time the service waits for initialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_wait_time_ms: Option<u64>,
    /// Whether a failed initialization still yields a usable client.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub init_can_fail: bool,
    /// Streaming data source settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<StreamingParams>,
    /// Polling data source settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling: Option<PollingParams>,
    /// Analytics event settings; absent disables events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<EventParams>,
    /// Application tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagParams>,
    /// Client-side SDK settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_side: Option<ClientSideParams>,
    /// Evaluation hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<HookParams>,
}

/// Streaming data source settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingParams {
    /// Stream base URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_uri: Option<String>,
    /// First reconnect delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_retry_delay_ms: Option<u64>,
    /// Payload filter key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Polling data source settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingParams {
    /// Poll base URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_uri: Option<String>,
    /// Interval between polls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

/// Analytics event settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
    /// Event base URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_uri: Option<String>,
    /// Event buffer capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,
    /// Whether diagnostic events are sent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_diagnostics: bool,
    /// Whether every context attribute is private.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all_attributes_private: bool,
    /// Attribute references redacted for every context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_private_attributes: Vec<String>,
    /// Automatic flush interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_interval_ms: Option<u64>,
    /// Whether event posts are gzip-compressed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_gzip: bool,
}

/// Application tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagParams {
    /// Application id tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    /// Application version tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_version: Option<String>,
}

/// Client-side SDK settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSideParams {
    /// Context the SDK starts with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_context: Option<Value>,
    /// Legacy user the SDK starts with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_user: Option<Value>,
    /// Whether evaluation reasons are requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_reasons: Option<bool>,
    /// Whether flags are fetched with `REPORT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_report: Option<bool>,
    /// Whether environment attributes are added to contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_environment_attributes: Option<bool>,
}

/// Hook settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookParams {
    /// Hook instances in registration order.
    pub hooks: Vec<HookInstanceParams>,
}

/// One hook instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInstanceParams {
    /// Hook name.
    pub name: String,
    /// URI the hook posts each stage call to.
    pub callback_uri: String,
    /// Per-stage data the hook returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Per-stage error messages the hook raises.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
}
