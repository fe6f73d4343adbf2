// crates/flag-harness-mock/src/source.rs
// ============================================================================
// Module: Data Source
// Description: Committed flag/segment state shared by stream and poll services.
// Purpose: Own the version store, staged changes, and basis bookkeeping.
// Dependencies: flag-harness-core
// ============================================================================

//! ## Overview
//! A [`DataSource`] holds the committed [`VersionStore`] that every transfer is
//! built from, plus a list of staged changes that are invisible until
//! [`DataSource::commit`] folds them in. Each commit or data replacement bumps
//! the payload version and yields a new [`Selector`]. Selector states are
//! unique to the source that issued them, so a basis from another source (or
//! from a previous data set) is never mistaken for a known one.
//!
//! Selector states carry the issuing source id and payload version
//! (`src<id>-<version>`). The committed change sets since the last data
//! replacement are retained so that a stale basis can be caught up with
//! `xfer-changes` when the [`StaleBasisPolicy`] allows it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use flag_harness_core::ApplyOutcome;
use flag_harness_core::DataSet;
use flag_harness_core::DataSetKind;
use flag_harness_core::EntityKind;
use flag_harness_core::Intent;
use flag_harness_core::IntentCode;
use flag_harness_core::ItemChange;
use flag_harness_core::Selector;
use flag_harness_core::StreamFrame;
use flag_harness_core::VersionStore;
use serde_json::Map;
use serde_json::Value;

use crate::error::MockError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Intent reason for a cold start.
pub const REASON_PAYLOAD_MISSING: &str = "payload-missing";
/// Intent reason for a current basis.
pub const REASON_UP_TO_DATE: &str = "up-to-date";
/// Intent reason for an incremental catch-up.
pub const REASON_STALE: &str = "stale";
/// Intent reason for a basis that cannot be caught up incrementally.
pub const REASON_CANT_CATCHUP: &str = "cant-catchup";

/// Process-wide source id counter.
static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SECTION: Policy
// ============================================================================

/// How a known but outdated basis is answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StaleBasisPolicy {
    /// Always resend the full snapshot.
    #[default]
    FullTransfer,
    /// Send only the committed changes since the basis.
    Changes,
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Committed change set recorded at one payload version.
#[derive(Debug, Clone)]
struct CommittedChanges {
    /// Version produced by the commit.
    version: u64,
    /// Changes that took effect.
    changes: Vec<ItemChange>,
}

/// Mutable state behind a [`DataSource`].
#[derive(Debug)]
struct SourceState {
    /// Data set shape.
    shape: DataSetKind,
    /// Committed store.
    committed: VersionStore,
    /// Staged changes awaiting commit.
    pending: Vec<ItemChange>,
    /// Current payload version.
    version: u64,
    /// Oldest version that can be caught up incrementally.
    history_floor: u64,
    /// Committed change sets newer than `history_floor`.
    history: Vec<CommittedChanges>,
}

/// Shared, mutable data source.
#[derive(Debug, Clone)]
pub struct DataSource {
    /// Process-unique id embedded in selector states.
    id: u64,
    /// Guarded state.
    state: Arc<Mutex<SourceState>>,
}

impl DataSource {
    /// Creates a source serving `data` at payload version 1.
    #[must_use]
    pub fn new(data: impl Into<DataSet>) -> Self {
        let data = data.into();
        Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::SeqCst),
            state: Arc::new(Mutex::new(SourceState {
                shape: data.kind(),
                committed: VersionStore::from_changes(data.to_changes()),
                pending: Vec::new(),
                version: 1,
                history_floor: 1,
                history: Vec::new(),
            })),
        }
    }

    /// Data set shape.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn shape(&self) -> Result<DataSetKind, MockError> {
        Ok(self.lock()?.shape)
    }

    /// Selector for the current committed state.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn selector(&self) -> Result<Selector, MockError> {
        let version = self.lock()?.version;
        Ok(self.selector_at(version))
    }

    /// Snapshot of the committed store.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn committed(&self) -> Result<VersionStore, MockError> {
        Ok(self.lock()?.committed.clone())
    }

    /// Number of staged, uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn pending_len(&self) -> Result<usize, MockError> {
        Ok(self.lock()?.pending.len())
    }

    /// Stages a change; it stays invisible until [`Self::commit`].
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn stage(&self, change: ItemChange) -> Result<(), MockError> {
        self.lock()?.pending.push(change);
        Ok(())
    }

    /// Folds staged changes into the committed store and bumps the version.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn commit(&self) -> Result<Selector, MockError> {
        let mut state = self.lock()?;
        let pending = std::mem::take(&mut state.pending);
        let effective: Vec<ItemChange> =
            pending.into_iter().filter(|change| state.committed.apply(change).is_applied()).collect();
        let version = record_history(&mut state, effective);
        drop(state);
        Ok(self.selector_at(version))
    }

    /// Drops staged changes without committing them.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn discard_pending(&self) -> Result<usize, MockError> {
        let mut state = self.lock()?;
        let discarded = state.pending.len();
        state.pending.clear();
        Ok(discarded)
    }

    /// Applies a change immediately (legacy framing) under version rules.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn apply_now(&self, change: ItemChange) -> Result<ApplyOutcome, MockError> {
        let mut state = self.lock()?;
        let outcome = state.committed.apply(&change);
        if outcome.is_applied() {
            record_history(&mut state, vec![change]);
        }
        Ok(outcome)
    }

    /// Replaces the committed data; staged changes and history are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn set_data(&self, data: impl Into<DataSet>) -> Result<Selector, MockError> {
        let data = data.into();
        let mut state = self.lock()?;
        state.shape = data.kind();
        state.committed = VersionStore::from_changes(data.to_changes());
        state.pending.clear();
        state.history.clear();
        state.version += 1;
        state.history_floor = state.version;
        let version = state.version;
        drop(state);
        Ok(self.selector_at(version))
    }

    /// Frames answering a versioned connect or poll carrying `basis`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn initial_transfer(
        &self,
        basis: Option<&str>,
        policy: StaleBasisPolicy,
    ) -> Result<Vec<StreamFrame>, MockError> {
        let state = self.lock()?;
        Ok(self.transfer_frames(&state, basis, policy))
    }

    /// Frames for a new stream: the initial transfer followed by every staged
    /// change, so the next commit covers exactly what the stream received.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn stream_transfer(
        &self,
        basis: Option<&str>,
        policy: StaleBasisPolicy,
    ) -> Result<Vec<StreamFrame>, MockError> {
        let state = self.lock()?;
        let mut frames = self.transfer_frames(&state, basis, policy);
        frames.extend(state.pending.iter().map(StreamFrame::from_change));
        Ok(frames)
    }

    /// Builds the transfer for `basis` from locked state.
    fn transfer_frames(
        &self,
        state: &SourceState,
        basis: Option<&str>,
        policy: StaleBasisPolicy,
    ) -> Vec<StreamFrame> {
        let current = self.selector_at(state.version);
        let basis = basis.filter(|basis| !basis.is_empty());
        let Some(basis) = basis else {
            return full_transfer(state, &current, REASON_PAYLOAD_MISSING);
        };
        match self.parse_basis(basis) {
            Some(version) if version == state.version => vec![StreamFrame::server_intent(
                &Intent::new(IntentCode::None, REASON_UP_TO_DATE),
                state.version,
            )],
            Some(version)
                if version < state.version
                    && version >= state.history_floor
                    && policy == StaleBasisPolicy::Changes =>
            {
                let mut frames = vec![StreamFrame::server_intent(
                    &Intent::new(IntentCode::TransferChanges, REASON_STALE),
                    state.version,
                )];
                frames.extend(
                    state
                        .history
                        .iter()
                        .filter(|entry| entry.version > version)
                        .flat_map(|entry| entry.changes.iter().map(StreamFrame::from_change)),
                );
                frames.push(StreamFrame::payload_transferred(&current));
                frames
            }
            _ => full_transfer(state, &current, REASON_CANT_CATCHUP),
        }
    }

    /// Full data payload for a legacy `put` or legacy poll response.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the state lock is poisoned.
    pub fn legacy_data(&self) -> Result<Value, MockError> {
        let state = self.lock()?;
        let flags = versioned_map(&state.committed, EntityKind::Flag);
        Ok(match state.shape {
            DataSetKind::Server => serde_json::json!({
                "flags": flags,
                "segments": versioned_map(&state.committed, EntityKind::Segment),
            }),
            DataSetKind::Client => Value::Object(flags),
        })
    }

    /// Builds the selector this source issues for `version`.
    fn selector_at(&self, version: u64) -> Selector {
        Selector::new(format!("src{}-{version}", self.id), version)
    }

    /// Returns the version named by a basis this source issued.
    fn parse_basis(&self, basis: &str) -> Option<u64> {
        basis.strip_prefix(&format!("src{}-", self.id))?.parse().ok()
    }

    /// Locks the state.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SourceState>, MockError> {
        self.state.lock().map_err(|_| MockError::Wiring("data source lock poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Bumps the version and records the changes that took effect at it.
fn record_history(state: &mut SourceState, changes: Vec<ItemChange>) -> u64 {
    state.version += 1;
    let version = state.version;
    state.history.push(CommittedChanges {
        version,
        changes,
    });
    version
}

/// Frames for a full transfer of the committed store.
fn full_transfer(state: &SourceState, current: &Selector, reason: &str) -> Vec<StreamFrame> {
    let mut frames = vec![StreamFrame::server_intent(
        &Intent::new(IntentCode::TransferFull, reason),
        state.version,
    )];
    frames.extend(state.committed.snapshot_changes().iter().map(StreamFrame::from_change));
    frames.push(StreamFrame::payload_transferred(current));
    frames
}

/// Live objects of one kind with their stored version written into each object.
fn versioned_map(store: &VersionStore, kind: EntityKind) -> Map<String, Value> {
    store
        .live_items()
        .filter(|(item_kind, ..)| *item_kind == kind)
        .map(|(_, key, version, object)| {
            let mut object = object.clone();
            if let Value::Object(map) = &mut object {
                map.insert("version".to_string(), Value::from(version));
            }
            (key.to_string(), object)
        })
        .collect()
}
