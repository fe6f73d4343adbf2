// crates/flag-harness-core/src/store.rs
// ============================================================================
// Module: Per-Key Version Store
// Description: Versioned flag/segment storage with tombstone retention.
// Purpose: Decide which incoming updates and deletes take effect.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`VersionStore`] keeps, for every `(kind, key)` pair, the highest version
//! ever applied together with the live object (or a tombstone).
//! Invariants:
//! - `upsert` and `delete` apply iff `incoming > stored`.
//! - Deletes retain their version as a tombstone, so equal or lower updates
//!   for the same key stay rejected after the key disappears.
//! - Only the version passed alongside a change is consulted; any `version`
//!   field nested inside the object payload is opaque data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Entity Kinds
// ============================================================================

/// Kinds of versioned entities served by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Feature flag.
    Flag,
    /// User/context segment.
    Segment,
}

impl EntityKind {
    /// Returns the wire label used in `kind` fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Segment => "segment",
        }
    }

    /// Returns the collection name used in legacy paths and put payloads.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Flag => "flags",
            Self::Segment => "segments",
        }
    }

    /// Parses a wire `kind` label; unknown labels yield `None`.
    #[must_use]
    pub fn from_wire(label: &str) -> Option<Self> {
        match label {
            "flag" => Some(Self::Flag),
            "segment" => Some(Self::Segment),
            _ => None,
        }
    }

    /// Parses a legacy `/flags/<key>` or `/segments/<key>` path.
    #[must_use]
    pub fn from_legacy_path(path: &str) -> Option<(Self, &str)> {
        if let Some(key) = path.strip_prefix("/flags/") {
            return (!key.is_empty()).then_some((Self::Flag, key));
        }
        if let Some(key) = path.strip_prefix("/segments/") {
            return (!key.is_empty()).then_some((Self::Segment, key));
        }
        None
    }

    /// Builds the legacy path for a key of this kind.
    #[must_use]
    pub fn legacy_path(self, key: &str) -> String {
        format!("/{}/{key}", self.collection())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Changes
// ============================================================================

/// What a change does to its key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeAction {
    /// Insert or replace the object.
    Put(Value),
    /// Remove the object, leaving a tombstone.
    Delete,
}

/// A single versioned change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChange {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity key.
    pub key: String,
    /// Authoritative change version.
    pub version: u64,
    /// Put or delete.
    pub action: ChangeAction,
}

impl ItemChange {
    /// Builds a put change.
    #[must_use]
    pub fn put(kind: EntityKind, key: impl Into<String>, version: u64, object: Value) -> Self {
        Self {
            kind,
            key: key.into(),
            version,
            action: ChangeAction::Put(object),
        }
    }

    /// Builds a delete change.
    #[must_use]
    pub fn delete(kind: EntityKind, key: impl Into<String>, version: u64) -> Self {
        Self {
            kind,
            key: key.into(),
            version,
            action: ChangeAction::Delete,
        }
    }

    /// Returns true for deletes.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self.action, ChangeAction::Delete)
    }
}

/// Result of offering a change to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The change took effect.
    Applied,
    /// The change was rejected; `stored` is the version that beat it.
    Stale {
        /// Version already held for the key.
        stored: u64,
    },
}

impl ApplyOutcome {
    /// Returns true when the change took effect.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Stored state of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    /// Highest applied version.
    pub version: u64,
    /// Live object, or `None` for a tombstone.
    pub object: Option<Value>,
}

impl StoredItem {
    /// Returns true when the key has been deleted.
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.object.is_none()
    }
}

/// Per-key version store with tombstone retention.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionStore {
    /// Items keyed by kind then key.
    items: BTreeMap<(EntityKind, String), StoredItem>,
}

impl VersionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a list of changes, applying version rules in order.
    #[must_use]
    pub fn from_changes<I>(changes: I) -> Self
    where
        I: IntoIterator<Item = ItemChange>,
    {
        let mut store = Self::new();
        for change in changes {
            store.apply(&change);
        }
        store
    }

    /// Inserts or replaces an object iff `version` beats the stored version.
    pub fn upsert(
        &mut self,
        kind: EntityKind,
        key: &str,
        version: u64,
        object: Value,
    ) -> ApplyOutcome {
        self.offer(kind, key, version, Some(object))
    }

    /// Deletes a key iff `version` beats the stored version, leaving a tombstone.
    pub fn delete(&mut self, kind: EntityKind, key: &str, version: u64) -> ApplyOutcome {
        self.offer(kind, key, version, None)
    }

    /// Applies a change using the same rules as [`Self::upsert`] and [`Self::delete`].
    pub fn apply(&mut self, change: &ItemChange) -> ApplyOutcome {
        match &change.action {
            ChangeAction::Put(object) => {
                self.upsert(change.kind, &change.key, change.version, object.clone())
            }
            ChangeAction::Delete => self.delete(change.kind, &change.key, change.version),
        }
    }

    /// Returns the live object for a key (tombstones read as absent).
    #[must_use]
    pub fn get(&self, kind: EntityKind, key: &str) -> Option<&Value> {
        self.items.get(&(kind, key.to_string())).and_then(|item| item.object.as_ref())
    }

    /// Returns the stored entry for a key, including tombstones.
    #[must_use]
    pub fn entry(&self, kind: EntityKind, key: &str) -> Option<&StoredItem> {
        self.items.get(&(kind, key.to_string()))
    }

    /// Returns the retained version for a key, including tombstones.
    #[must_use]
    pub fn version_of(&self, kind: EntityKind, key: &str) -> Option<u64> {
        self.entry(kind, key).map(|item| item.version)
    }

    /// Iterates live (non-tombstoned) items in kind/key order.
    pub fn live_items(&self) -> impl Iterator<Item = (EntityKind, &str, u64, &Value)> {
        self.items.iter().filter_map(|((kind, key), item)| {
            item.object.as_ref().map(|object| (*kind, key.as_str(), item.version, object))
        })
    }

    /// Returns live items as put changes, suitable for a full transfer.
    #[must_use]
    pub fn snapshot_changes(&self) -> Vec<ItemChange> {
        self.live_items()
            .map(|(kind, key, version, object)| ItemChange::put(kind, key, version, object.clone()))
            .collect()
    }

    /// Returns the live objects of one kind keyed by entity key.
    #[must_use]
    pub fn live_map(&self, kind: EntityKind) -> serde_json::Map<String, Value> {
        self.live_items()
            .filter(|(item_kind, ..)| *item_kind == kind)
            .map(|(_, key, _, object)| (key.to_string(), object.clone()))
            .collect()
    }

    /// Number of live items.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.live_items().count()
    }

    /// Returns true when no live items exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_len() == 0
    }

    /// Shared version check for puts and deletes.
    fn offer(
        &mut self,
        kind: EntityKind,
        key: &str,
        version: u64,
        object: Option<Value>,
    ) -> ApplyOutcome {
        let slot = (kind, key.to_string());
        if let Some(existing) = self.items.get(&slot)
            && version <= existing.version
        {
            return ApplyOutcome::Stale {
                stored: existing.version,
            };
        }
        self.items.insert(
            slot,
            StoredItem {
                version,
                object,
            },
        );
        ApplyOutcome::Applied
    }
}
