// crates/flag-harness-core/src/data.rs
// ============================================================================
// Module: Data Sets
// Description: Immutable flag/segment snapshots served by the mock backend.
// Purpose: Build server-side and client-side data sets and their wire forms.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`DataSet`] is what a mock data source serves on a full transfer. Server
//! data sets carry complete flag and segment models; client data sets carry
//! pre-evaluated values per flag key. Both are immutable once built: a service
//! is handed a new data set rather than having this one mutated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::store::EntityKind;
use crate::store::ItemChange;

// ============================================================================
// SECTION: Flag and Segment Models
// ============================================================================

/// Fallthrough of a flag that has no matching targets or rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fallthrough {
    /// Variation index served on fallthrough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
}

/// Server-side flag model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRepresentation {
    /// Unique flag key.
    pub key: String,
    /// Flag version.
    pub version: u64,
    /// Whether targeting is on.
    pub on: bool,
    /// Variation values.
    #[serde(default)]
    pub variations: Vec<Value>,
    /// Fallthrough variation.
    #[serde(default)]
    pub fallthrough: Fallthrough,
    /// Variation served when the flag is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_variation: Option<usize>,
    /// Individual targets.
    #[serde(default)]
    pub targets: Vec<Value>,
    /// Targeting rules.
    #[serde(default)]
    pub rules: Vec<Value>,
    /// Prerequisite flags.
    #[serde(default)]
    pub prerequisites: Vec<Value>,
    /// Hashing salt.
    #[serde(default)]
    pub salt: String,
    /// Any other model properties, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server-side segment model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRepresentation {
    /// Unique segment key.
    pub key: String,
    /// Segment version.
    pub version: u64,
    /// Explicitly included context keys.
    #[serde(default)]
    pub included: Vec<String>,
    /// Explicitly excluded context keys.
    #[serde(default)]
    pub excluded: Vec<String>,
    /// Segment rules.
    #[serde(default)]
    pub rules: Vec<Value>,
    /// Hashing salt.
    #[serde(default)]
    pub salt: String,
    /// Any other model properties, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Builder for [`FlagRepresentation`].
#[derive(Debug, Clone)]
pub struct FlagBuilder {
    /// Flag under construction.
    flag: FlagRepresentation,
}

impl FlagBuilder {
    /// Starts a flag at version 1, off, with no variations.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            flag: FlagRepresentation {
                salt: format!("{key}-salt"),
                key,
                version: 1,
                on: false,
                variations: Vec::new(),
                fallthrough: Fallthrough::default(),
                off_variation: None,
                targets: Vec::new(),
                rules: Vec::new(),
                prerequisites: Vec::new(),
                extra: Map::new(),
            },
        }
    }

    /// Builds a flag that returns `value` for everyone.
    #[must_use]
    pub fn single_value(key: impl Into<String>, version: u64, value: Value) -> FlagRepresentation {
        Self::new(key)
            .version(version)
            .on(false)
            .variations([value])
            .off_variation(0)
            .fallthrough_variation(0)
            .build()
    }

    /// Sets the version.
    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.flag.version = version;
        self
    }

    /// Sets the on/off state.
    #[must_use]
    pub const fn on(mut self, on: bool) -> Self {
        self.flag.on = on;
        self
    }

    /// Replaces the variation list.
    #[must_use]
    pub fn variations<I>(mut self, variations: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.flag.variations = variations.into_iter().collect();
        self
    }

    /// Sets the fallthrough variation index.
    #[must_use]
    pub const fn fallthrough_variation(mut self, index: usize) -> Self {
        self.flag.fallthrough.variation = Some(index);
        self
    }

    /// Sets the off variation index.
    #[must_use]
    pub const fn off_variation(mut self, index: usize) -> Self {
        self.flag.off_variation = Some(index);
        self
    }

    /// Marks the flag as available to client-side SDKs.
    #[must_use]
    pub fn client_side(self, available: bool) -> Self {
        self.property(
            "clientSideAvailability",
            serde_json::json!({ "usingMobileKey": available, "usingEnvironmentId": available }),
        )
    }

    /// Sets an arbitrary extra model property.
    #[must_use]
    pub fn property(mut self, name: &str, value: Value) -> Self {
        self.flag.extra.insert(name.to_string(), value);
        self
    }

    /// Finishes the flag.
    #[must_use]
    pub fn build(self) -> FlagRepresentation {
        self.flag
    }
}

/// Builder for [`SegmentRepresentation`].
#[derive(Debug, Clone)]
pub struct SegmentBuilder {
    /// Segment under construction.
    segment: SegmentRepresentation,
}

impl SegmentBuilder {
    /// Starts a segment at version 1 with no members.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            segment: SegmentRepresentation {
                salt: format!("{key}-salt"),
                key,
                version: 1,
                included: Vec::new(),
                excluded: Vec::new(),
                rules: Vec::new(),
                extra: Map::new(),
            },
        }
    }

    /// Sets the version.
    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.segment.version = version;
        self
    }

    /// Adds included context keys.
    #[must_use]
    pub fn included<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.segment.included.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds excluded context keys.
    #[must_use]
    pub fn excluded<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.segment.excluded.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Finishes the segment.
    #[must_use]
    pub fn build(self) -> SegmentRepresentation {
        self.segment
    }
}

// ============================================================================
// SECTION: Server Data Set
// ============================================================================

/// Immutable server-side snapshot of flags and segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerDataSet {
    /// Flags keyed by flag key.
    flags: BTreeMap<String, FlagRepresentation>,
    /// Segments keyed by segment key.
    segments: BTreeMap<String, SegmentRepresentation>,
}

impl ServerDataSet {
    /// Returns an empty data set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ServerDataSetBuilder {
        ServerDataSetBuilder::default()
    }

    /// Returns the flags.
    #[must_use]
    pub const fn flags(&self) -> &BTreeMap<String, FlagRepresentation> {
        &self.flags
    }

    /// Returns the segments.
    #[must_use]
    pub const fn segments(&self) -> &BTreeMap<String, SegmentRepresentation> {
        &self.segments
    }

    /// Serializes the legacy full-data payload `{"flags":{..},"segments":{..}}`.
    #[must_use]
    pub fn to_put_data(&self) -> Value {
        serde_json::json!({
            "flags": to_value_map(&self.flags),
            "segments": to_value_map(&self.segments),
        })
    }

    /// Returns one put change per flag and segment.
    #[must_use]
    pub fn to_changes(&self) -> Vec<ItemChange> {
        let flags = self.flags.values().map(|flag| {
            ItemChange::put(EntityKind::Flag, &flag.key, flag.version, to_value_or_null(flag))
        });
        let segments = self.segments.values().map(|segment| {
            ItemChange::put(
                EntityKind::Segment,
                &segment.key,
                segment.version,
                to_value_or_null(segment),
            )
        });
        flags.chain(segments).collect()
    }
}

/// Builder for [`ServerDataSet`].
#[derive(Debug, Clone, Default)]
pub struct ServerDataSetBuilder {
    /// Data set under construction.
    data: ServerDataSet,
}

impl ServerDataSetBuilder {
    /// Adds or replaces a flag.
    #[must_use]
    pub fn flag(mut self, flag: FlagRepresentation) -> Self {
        self.data.flags.insert(flag.key.clone(), flag);
        self
    }

    /// Adds or replaces a segment.
    #[must_use]
    pub fn segment(mut self, segment: SegmentRepresentation) -> Self {
        self.data.segments.insert(segment.key.clone(), segment);
        self
    }

    /// Finishes the data set.
    #[must_use]
    pub fn build(self) -> ServerDataSet {
        self.data
    }
}

// ============================================================================
// SECTION: Client Data Set
// ============================================================================

/// Pre-evaluated flag state served to client-side SDKs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFlag {
    /// Evaluated value.
    pub value: Value,
    /// Variation index, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<usize>,
    /// Flag state version.
    pub version: u64,
    /// Underlying flag model version, if distinct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_version: Option<u64>,
    /// Evaluation reason, if reasons are served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
    /// Whether full feature events are requested.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub track_events: bool,
}

impl ClientFlag {
    /// Creates a flag value at version 1.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self {
            value,
            variation: None,
            version: 1,
            flag_version: None,
            reason: None,
            track_events: false,
        }
    }

    /// Sets the variation index.
    #[must_use]
    pub const fn variation(mut self, index: usize) -> Self {
        self.variation = Some(index);
        self
    }

    /// Sets the version.
    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Sets the evaluation reason.
    #[must_use]
    pub fn reason(mut self, reason: Value) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Requests full feature events.
    #[must_use]
    pub const fn track_events(mut self, track: bool) -> Self {
        self.track_events = track;
        self
    }
}

/// Immutable client-side snapshot of flag values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientDataSet {
    /// Flags keyed by flag key.
    flags: BTreeMap<String, ClientFlag>,
}

impl ClientDataSet {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ClientDataSetBuilder {
        ClientDataSetBuilder::default()
    }

    /// Returns the flags.
    #[must_use]
    pub const fn flags(&self) -> &BTreeMap<String, ClientFlag> {
        &self.flags
    }

    /// Serializes the flag map served on client polls and legacy `put`.
    #[must_use]
    pub fn to_put_data(&self) -> Value {
        Value::Object(to_value_map(&self.flags))
    }

    /// Returns one put change per flag.
    #[must_use]
    pub fn to_changes(&self) -> Vec<ItemChange> {
        self.flags
            .iter()
            .map(|(key, flag)| {
                ItemChange::put(EntityKind::Flag, key, flag.version, to_value_or_null(flag))
            })
            .collect()
    }
}

/// Builder for [`ClientDataSet`].
#[derive(Debug, Clone, Default)]
pub struct ClientDataSetBuilder {
    /// Data set under construction.
    data: ClientDataSet,
}

impl ClientDataSetBuilder {
    /// Adds or replaces a flag value.
    #[must_use]
    pub fn flag(mut self, key: impl Into<String>, flag: ClientFlag) -> Self {
        self.data.flags.insert(key.into(), flag);
        self
    }

    /// Finishes the data set.
    #[must_use]
    pub fn build(self) -> ClientDataSet {
        self.data
    }
}

// ============================================================================
// SECTION: Data Set
// ============================================================================

/// Shape of a data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSetKind {
    /// Flags and segments with full models.
    Server,
    /// Pre-evaluated flag values.
    Client,
}

/// Either a server-side or a client-side snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSet {
    /// Server-side snapshot.
    Server(ServerDataSet),
    /// Client-side snapshot.
    Client(ClientDataSet),
}

impl DataSet {
    /// Returns an empty server-side data set.
    #[must_use]
    pub fn empty_server() -> Self {
        Self::Server(ServerDataSet::empty())
    }

    /// Returns the data set kind.
    #[must_use]
    pub const fn kind(&self) -> DataSetKind {
        match self {
            Self::Server(_) => DataSetKind::Server,
            Self::Client(_) => DataSetKind::Client,
        }
    }

    /// Returns one put change per entity.
    #[must_use]
    pub fn to_changes(&self) -> Vec<ItemChange> {
        match self {
            Self::Server(data) => data.to_changes(),
            Self::Client(data) => data.to_changes(),
        }
    }

    /// Returns the legacy full-data payload.
    #[must_use]
    pub fn to_put_data(&self) -> Value {
        match self {
            Self::Server(data) => data.to_put_data(),
            Self::Client(data) => data.to_put_data(),
        }
    }
}

impl From<ServerDataSet> for DataSet {
    fn from(data: ServerDataSet) -> Self {
        Self::Server(data)
    }
}

impl From<ClientDataSet> for DataSet {
    fn from(data: ClientDataSet) -> Self {
        Self::Client(data)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serializes a keyed collection into a JSON object.
fn to_value_map<T: Serialize>(items: &BTreeMap<String, T>) -> Map<String, Value> {
    items.iter().map(|(key, item)| (key.clone(), to_value_or_null(item))).collect()
}

/// Serializes a model; the models here only hold JSON-representable data.
fn to_value_or_null<T: Serialize>(item: &T) -> Value {
    serde_json::to_value(item).unwrap_or(Value::Null)
}
