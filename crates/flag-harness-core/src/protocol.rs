// crates/flag-harness-core/src/protocol.rs
// ============================================================================
// Module: Stream Protocol Frames
// Description: Frame encoding, parsing, and consumer-side classification.
// Purpose: Define the exact wire shape of stream frames in both framings.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Frames are named events carrying a raw payload string. Two framings exist:
//! - **Versioned**: `server-intent`, `put-object`, `delete-object`,
//!   `payload-transferred`, `heartbeat`, `goodbye`, `error`.
//! - **Legacy**: `put`, `patch`, `delete` with JSON-pointer style paths.
//!
//! [`classify_frame`] encodes the consumer contract for malformed data:
//! - invalid JSON or schema violations for a known frame name drop the
//!   connection ([`FrameDisposition::Reconnect`]);
//! - unknown frame names, unknown object kinds, and unknown legacy paths are
//!   ignored ([`FrameDisposition::Ignore`]);
//! - unknown extra fields never matter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::data::DataSetKind;
use crate::store::ChangeAction;
use crate::store::EntityKind;
use crate::store::ItemChange;

// ============================================================================
// SECTION: Frame Names
// ============================================================================

/// Versioned framing: transfer intent.
pub const SERVER_INTENT: &str = "server-intent";
/// Versioned framing: object upsert.
pub const PUT_OBJECT: &str = "put-object";
/// Versioned framing: object delete.
pub const DELETE_OBJECT: &str = "delete-object";
/// Versioned framing: commit marker.
pub const PAYLOAD_TRANSFERRED: &str = "payload-transferred";
/// Keep-alive frame.
pub const HEARTBEAT: &str = "heartbeat";
/// Server-initiated disconnect notice.
pub const GOODBYE: &str = "goodbye";
/// Server-side payload error.
pub const ERROR: &str = "error";
/// Legacy framing: full data replace.
pub const LEGACY_PUT: &str = "put";
/// Legacy framing: single item upsert.
pub const LEGACY_PATCH: &str = "patch";
/// Legacy framing: single item delete.
pub const LEGACY_DELETE: &str = "delete";

// ============================================================================
// SECTION: Intents and Selectors
// ============================================================================

/// Transfer intent announced at the start of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentCode {
    /// Consumer is already up to date; no data follows.
    #[serde(rename = "none")]
    None,
    /// Full snapshot follows.
    #[serde(rename = "xfer-full")]
    TransferFull,
    /// Incremental changes follow.
    #[serde(rename = "xfer-changes")]
    TransferChanges,
}

impl IntentCode {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TransferFull => "xfer-full",
            Self::TransferChanges => "xfer-changes",
        }
    }
}

/// Intent plus its human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    /// Transfer intent.
    pub code: IntentCode,
    /// Reason label (for example `up-to-date` or `cant-catchup`).
    pub reason: String,
}

impl Intent {
    /// Builds an intent.
    #[must_use]
    pub fn new(code: IntentCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Committed state identity carried by `payload-transferred` and `basis`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// Opaque state identifier echoed back as the `basis` query parameter.
    pub state: String,
    /// Monotonic payload version.
    pub version: u64,
}

impl Selector {
    /// Builds a selector.
    #[must_use]
    pub fn new(state: impl Into<String>, version: u64) -> Self {
        Self {
            state: state.into(),
            version,
        }
    }
}

/// Goodbye frame content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Disconnect reason.
    #[serde(default)]
    pub reason: String,
    /// When true the connection stays open after the frame.
    #[serde(default)]
    pub silent: bool,
    /// When true the consumer should not reconnect eagerly.
    #[serde(default)]
    pub catastrophe: bool,
}

impl Goodbye {
    /// Builds a goodbye with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            silent: false,
            catastrophe: false,
        }
    }

    /// Returns true when the emitter should close the connection afterwards.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        self.catastrophe || !self.silent
    }
}

/// Framing spoken by a stream or poll endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamProtocol {
    /// Intent / object / commit framing with basis continuation.
    #[default]
    Versioned,
    /// `put` / `patch` / `delete` framing applied immediately.
    Legacy,
}

// ============================================================================
// SECTION: Stream Frames
// ============================================================================

/// A named frame with its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Event name.
    pub name: String,
    /// Raw payload (normally JSON, but arbitrary text is allowed).
    pub data: String,
}

impl StreamFrame {
    /// Builds a frame from a name and an arbitrary payload.
    #[must_use]
    pub fn raw(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Builds a frame whose payload is a JSON value.
    #[must_use]
    pub fn json(name: &str, data: &Value) -> Self {
        Self::raw(name, data.to_string())
    }

    /// Builds a `server-intent` frame.
    #[must_use]
    pub fn server_intent(intent: &Intent, target: u64) -> Self {
        Self::json(
            SERVER_INTENT,
            &serde_json::json!({
                "payloads": [{
                    "id": "payload",
                    "target": target,
                    "intentCode": intent.code.as_str(),
                    "reason": intent.reason,
                }]
            }),
        )
    }

    /// Builds a `put-object` frame.
    #[must_use]
    pub fn put_object(kind: EntityKind, key: &str, version: u64, object: &Value) -> Self {
        Self::json(
            PUT_OBJECT,
            &serde_json::json!({
                "version": version,
                "kind": kind.as_str(),
                "key": key,
                "object": object,
            }),
        )
    }

    /// Builds a `delete-object` frame.
    #[must_use]
    pub fn delete_object(kind: EntityKind, key: &str, version: u64) -> Self {
        Self::json(
            DELETE_OBJECT,
            &serde_json::json!({ "version": version, "kind": kind.as_str(), "key": key }),
        )
    }

    /// Builds the versioned frame for a change.
    #[must_use]
    pub fn from_change(change: &ItemChange) -> Self {
        match &change.action {
            ChangeAction::Put(object) => {
                Self::put_object(change.kind, &change.key, change.version, object)
            }
            ChangeAction::Delete => Self::delete_object(change.kind, &change.key, change.version),
        }
    }

    /// Builds a `payload-transferred` frame.
    #[must_use]
    pub fn payload_transferred(selector: &Selector) -> Self {
        Self::json(
            PAYLOAD_TRANSFERRED,
            &serde_json::json!({ "state": selector.state, "version": selector.version }),
        )
    }

    /// Builds a `heartbeat` frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::raw(HEARTBEAT, "")
    }

    /// Builds a `goodbye` frame.
    #[must_use]
    pub fn goodbye(goodbye: &Goodbye) -> Self {
        Self::json(
            GOODBYE,
            &serde_json::json!({
                "reason": goodbye.reason,
                "silent": goodbye.silent,
                "catastrophe": goodbye.catastrophe,
            }),
        )
    }

    /// Builds an `error` frame.
    #[must_use]
    pub fn error(payload_id: &str, reason: &str) -> Self {
        Self::json(ERROR, &serde_json::json!({ "payload_id": payload_id, "reason": reason }))
    }

    /// Builds a legacy `put` frame from full data.
    #[must_use]
    pub fn legacy_put(data: &Value) -> Self {
        Self::json(LEGACY_PUT, &serde_json::json!({ "path": "/", "data": data }))
    }

    /// Builds the legacy frame for a change in the given data-set shape.
    #[must_use]
    pub fn legacy_from_change(shape: DataSetKind, change: &ItemChange) -> Self {
        match (shape, &change.action) {
            (DataSetKind::Server, ChangeAction::Put(object)) => Self::json(
                LEGACY_PATCH,
                &serde_json::json!({
                    "path": change.kind.legacy_path(&change.key),
                    "data": with_version(object, change.version),
                }),
            ),
            (DataSetKind::Server, ChangeAction::Delete) => Self::json(
                LEGACY_DELETE,
                &serde_json::json!({
                    "path": change.kind.legacy_path(&change.key),
                    "version": change.version,
                }),
            ),
            (DataSetKind::Client, ChangeAction::Put(object)) => {
                let mut body = match with_version(object, change.version) {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                };
                body.insert("key".to_string(), Value::String(change.key.clone()));
                Self::json(LEGACY_PATCH, &Value::Object(body))
            }
            (DataSetKind::Client, ChangeAction::Delete) => Self::json(
                LEGACY_DELETE,
                &serde_json::json!({ "key": change.key, "version": change.version }),
            ),
        }
    }

    /// Renders the frame as a `text/event-stream` record.
    #[must_use]
    pub fn to_sse(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "event: {}", self.name);
        if self.data.is_empty() {
            out.push_str("data:\n");
        }
        for line in self.data.lines() {
            let _ = writeln!(out, "data: {line}");
        }
        out.push('\n');
        out
    }

    /// Renders the frame as a polling response entry `{"event","data"}`.
    #[must_use]
    pub fn to_poll_entry(&self) -> Value {
        let data = serde_json::from_str(&self.data)
            .unwrap_or_else(|_| Value::String(self.data.clone()));
        serde_json::json!({ "event": self.name, "data": data })
    }

    /// Parses a polling response entry back into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Schema`] when the entry lacks an event name.
    pub fn from_poll_entry(entry: &Value) -> Result<Self, ProtocolError> {
        let name = entry
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::schema("poll", "entry is missing an event name"))?;
        let data = match entry.get("data") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Ok(Self::raw(name, data))
    }
}

/// Returns `object` with its `version` field set to `version` when it is a map.
fn with_version(object: &Value, version: u64) -> Value {
    let mut object = object.clone();
    if let Value::Object(map) = &mut object {
        map.insert("version".to_string(), Value::from(version));
    }
    object
}

// ============================================================================
// SECTION: Parsed Frames
// ============================================================================

/// Semantic content of a frame after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFrame {
    /// Transfer intent.
    ServerIntent(Intent),
    /// Versioned upsert or delete.
    Change(ItemChange),
    /// Commit marker.
    PayloadTransferred(Selector),
    /// Keep-alive.
    Heartbeat,
    /// Server-initiated disconnect notice.
    Goodbye(Goodbye),
    /// Server-side payload error; buffered changes are discarded.
    Error {
        /// Payload identifier, if supplied.
        payload_id: Option<String>,
        /// Error reason.
        reason: String,
    },
    /// Legacy full replace.
    LegacyPut(Vec<ItemChange>),
    /// Legacy single upsert or delete, applied immediately.
    LegacyChange(ItemChange),
}

/// What a consumer must do with a received frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameDisposition {
    /// Frame is valid and should be processed.
    Apply(ProtocolFrame),
    /// Frame is irrelevant and must be skipped without side effects.
    Ignore,
    /// Frame is malformed; the consumer must drop the connection.
    Reconnect(ProtocolError),
}

/// Stream frame errors that require dropping the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON.
    #[error("invalid json in {frame} frame: {message}")]
    InvalidJson {
        /// Frame name.
        frame: String,
        /// Parser message.
        message: String,
    },
    /// Payload is JSON but violates the frame schema.
    #[error("invalid {frame} frame: {message}")]
    Schema {
        /// Frame name.
        frame: String,
        /// Violation description.
        message: String,
    },
}

impl ProtocolError {
    /// Builds a schema violation error.
    fn schema(frame: &str, message: impl Into<String>) -> Self {
        Self::Schema {
            frame: frame.to_string(),
            message: message.into(),
        }
    }
}

/// Classifies a server-side frame.
#[must_use]
pub fn classify_frame(name: &str, data: &str) -> FrameDisposition {
    classify_frame_as(DataSetKind::Server, name, data)
}

/// Classifies a frame for consumers of the given data-set shape.
///
/// The shape only matters for legacy framing, where client-side payloads
/// carry flag values keyed directly instead of by path.
#[must_use]
pub fn classify_frame_as(shape: DataSetKind, name: &str, data: &str) -> FrameDisposition {
    if !is_known_frame(name) {
        return FrameDisposition::Ignore;
    }
    if name == HEARTBEAT {
        return FrameDisposition::Apply(ProtocolFrame::Heartbeat);
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(err) => {
            return FrameDisposition::Reconnect(ProtocolError::InvalidJson {
                frame: name.to_string(),
                message: err.to_string(),
            });
        }
    };
    match parse_known(shape, name, value) {
        Ok(Some(frame)) => FrameDisposition::Apply(frame),
        Ok(None) => FrameDisposition::Ignore,
        Err(err) => FrameDisposition::Reconnect(err),
    }
}

/// Returns true for names either framing defines.
fn is_known_frame(name: &str) -> bool {
    matches!(
        name,
        SERVER_INTENT
            | PUT_OBJECT
            | DELETE_OBJECT
            | PAYLOAD_TRANSFERRED
            | HEARTBEAT
            | GOODBYE
            | ERROR
            | LEGACY_PUT
            | LEGACY_PATCH
            | LEGACY_DELETE
    )
}

// ============================================================================
// SECTION: Wire Schemas
// ============================================================================

/// `server-intent` payload.
#[derive(Deserialize)]
struct IntentWire {
    /// Announced payloads.
    payloads: Vec<IntentPayloadWire>,
}

/// One entry in `server-intent.payloads`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentPayloadWire {
    /// Intent code label.
    intent_code: String,
    /// Reason label.
    #[serde(default)]
    reason: String,
}

/// `put-object` payload.
#[derive(Deserialize)]
struct PutObjectWire {
    /// Authoritative version.
    version: u64,
    /// Entity kind label.
    kind: String,
    /// Entity key.
    key: String,
    /// Object model.
    object: Map<String, Value>,
}

/// `delete-object` payload.
#[derive(Deserialize)]
struct DeleteObjectWire {
    /// Authoritative version.
    version: u64,
    /// Entity kind label.
    kind: String,
    /// Entity key.
    key: String,
}

/// `error` payload.
#[derive(Deserialize)]
struct ErrorWire {
    /// Payload identifier.
    #[serde(default)]
    payload_id: Option<String>,
    /// Error reason.
    #[serde(default)]
    reason: String,
}

/// Legacy `put` payload.
#[derive(Deserialize)]
struct LegacyPutWire {
    /// Replacement data.
    data: Map<String, Value>,
}

/// Legacy server `patch` payload.
#[derive(Deserialize)]
struct LegacyPatchWire {
    /// Item path.
    path: String,
    /// Item model, carrying its own version.
    data: Map<String, Value>,
}

/// Legacy server `delete` payload.
#[derive(Deserialize)]
struct LegacyDeleteWire {
    /// Item path.
    path: String,
    /// Delete version.
    version: u64,
}

/// Legacy client-side `delete` payload.
#[derive(Deserialize)]
struct ClientDeleteWire {
    /// Flag key.
    key: String,
    /// Delete version.
    version: u64,
}

/// Deserializes a frame payload into its schema.
fn decode<T: serde::de::DeserializeOwned>(frame: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|err| ProtocolError::schema(frame, err.to_string()))
}

/// Reads the `version` field of a model.
fn model_version(frame: &str, model: &Map<String, Value>) -> Result<u64, ProtocolError> {
    model
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::schema(frame, "model is missing a numeric version"))
}

/// Parses a known frame; `Ok(None)` means the frame is ignorable.
fn parse_known(
    shape: DataSetKind,
    name: &str,
    value: Value,
) -> Result<Option<ProtocolFrame>, ProtocolError> {
    match name {
        SERVER_INTENT => {
            let wire: IntentWire = decode(name, value)?;
            let payload = wire
                .payloads
                .into_iter()
                .next()
                .ok_or_else(|| ProtocolError::schema(name, "no payloads announced"))?;
            let code = match payload.intent_code.as_str() {
                "none" => IntentCode::None,
                "xfer-full" => IntentCode::TransferFull,
                "xfer-changes" => IntentCode::TransferChanges,
                other => {
                    return Err(ProtocolError::schema(name, format!("unknown intent code {other}")));
                }
            };
            Ok(Some(ProtocolFrame::ServerIntent(Intent::new(code, payload.reason))))
        }
        PUT_OBJECT => {
            let wire: PutObjectWire = decode(name, value)?;
            Ok(EntityKind::from_wire(&wire.kind).map(|kind| {
                ProtocolFrame::Change(ItemChange::put(
                    kind,
                    wire.key,
                    wire.version,
                    Value::Object(wire.object),
                ))
            }))
        }
        DELETE_OBJECT => {
            let wire: DeleteObjectWire = decode(name, value)?;
            Ok(EntityKind::from_wire(&wire.kind)
                .map(|kind| ProtocolFrame::Change(ItemChange::delete(kind, wire.key, wire.version))))
        }
        PAYLOAD_TRANSFERRED => {
            let selector: Selector = decode(name, value)?;
            Ok(Some(ProtocolFrame::PayloadTransferred(selector)))
        }
        GOODBYE => {
            let goodbye: Goodbye = decode(name, value)?;
            Ok(Some(ProtocolFrame::Goodbye(goodbye)))
        }
        ERROR => {
            let wire: ErrorWire = decode(name, value)?;
            Ok(Some(ProtocolFrame::Error {
                payload_id: wire.payload_id,
                reason: wire.reason,
            }))
        }
        LEGACY_PUT => parse_legacy_put(shape, name, value).map(Some),
        LEGACY_PATCH => parse_legacy_patch(shape, name, value),
        LEGACY_DELETE => parse_legacy_delete(shape, name, value),
        _ => Ok(None),
    }
}

/// Parses a legacy `put` into a list of puts.
fn parse_legacy_put(
    shape: DataSetKind,
    name: &str,
    value: Value,
) -> Result<ProtocolFrame, ProtocolError> {
    let wire: LegacyPutWire = decode(name, value)?;
    let mut changes = Vec::new();
    match shape {
        DataSetKind::Server => {
            for kind in [EntityKind::Flag, EntityKind::Segment] {
                let Some(collection) = wire.data.get(kind.collection()) else {
                    continue;
                };
                let items = collection.as_object().ok_or_else(|| {
                    ProtocolError::schema(name, format!("{} is not an object", kind.collection()))
                })?;
                for (key, item) in items {
                    changes.push(legacy_item(name, kind, key, item)?);
                }
            }
        }
        DataSetKind::Client => {
            for (key, item) in &wire.data {
                changes.push(legacy_item(name, EntityKind::Flag, key, item)?);
            }
        }
    }
    Ok(ProtocolFrame::LegacyPut(changes))
}

/// Builds a put change from one legacy model.
fn legacy_item(
    name: &str,
    kind: EntityKind,
    key: &str,
    item: &Value,
) -> Result<ItemChange, ProtocolError> {
    let model = item
        .as_object()
        .ok_or_else(|| ProtocolError::schema(name, format!("{kind} {key} is not an object")))?;
    let version = model_version(name, model)?;
    Ok(ItemChange::put(kind, key, version, item.clone()))
}

/// Parses a legacy `patch`.
fn parse_legacy_patch(
    shape: DataSetKind,
    name: &str,
    value: Value,
) -> Result<Option<ProtocolFrame>, ProtocolError> {
    match shape {
        DataSetKind::Server => {
            let wire: LegacyPatchWire = decode(name, value)?;
            let Some((kind, key)) = EntityKind::from_legacy_path(&wire.path) else {
                return Ok(None);
            };
            let version = model_version(name, &wire.data)?;
            Ok(Some(ProtocolFrame::LegacyChange(ItemChange::put(
                kind,
                key,
                version,
                Value::Object(wire.data),
            ))))
        }
        DataSetKind::Client => {
            let Value::Object(mut model) = value else {
                return Err(ProtocolError::schema(name, "payload is not an object"));
            };
            let key = match model.remove("key") {
                Some(Value::String(key)) => key,
                _ => return Err(ProtocolError::schema(name, "payload is missing a key")),
            };
            let version = model_version(name, &model)?;
            Ok(Some(ProtocolFrame::LegacyChange(ItemChange::put(
                EntityKind::Flag,
                key,
                version,
                Value::Object(model),
            ))))
        }
    }
}

/// Parses a legacy `delete`.
fn parse_legacy_delete(
    shape: DataSetKind,
    name: &str,
    value: Value,
) -> Result<Option<ProtocolFrame>, ProtocolError> {
    match shape {
        DataSetKind::Server => {
            let wire: LegacyDeleteWire = decode(name, value)?;
            Ok(EntityKind::from_legacy_path(&wire.path).map(|(kind, key)| {
                ProtocolFrame::LegacyChange(ItemChange::delete(kind, key, wire.version))
            }))
        }
        DataSetKind::Client => {
            let wire: ClientDeleteWire = decode(name, value)?;
            Ok(Some(ProtocolFrame::LegacyChange(ItemChange::delete(
                EntityKind::Flag,
                wire.key,
                wire.version,
            ))))
        }
    }
}
