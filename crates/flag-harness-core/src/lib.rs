// crates/flag-harness-core/src/lib.rs
// ============================================================================
// Module: Flag Harness Core
// Description: Data model and wire protocol for the flag SDK conformance harness.
// Purpose: Provide transport-free building blocks shared by mocks and clients.
// Dependencies: serde, serde_json, base64, thiserror
// ============================================================================

//! ## Overview
//! `flag-harness-core` holds everything about the vendor backend protocol that
//! does not need a socket: flag/segment data sets, the per-key version store,
//! stream frame encoding and classification, the SDK kind capability table,
//! backend status classification, and the structured log sinks.
//! Invariants:
//! - A change whose version is not strictly greater than the stored version
//!   for its key is never applied, including against tombstones.
//! - Frame classification is total: every (name, payload) pair maps to exactly
//!   one of apply, ignore, or reconnect.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod data;
pub mod log;
pub mod protocol;
pub mod sdk_kind;
pub mod sse;
pub mod status;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use data::ClientDataSet;
pub use data::ClientDataSetBuilder;
pub use data::ClientFlag;
pub use data::DataSet;
pub use data::DataSetKind;
pub use data::FlagBuilder;
pub use data::FlagRepresentation;
pub use data::SegmentBuilder;
pub use data::SegmentRepresentation;
pub use data::ServerDataSet;
pub use data::ServerDataSetBuilder;
pub use log::FileLogSink;
pub use log::HarnessLogEvent;
pub use log::HarnessLogSink;
pub use log::MemoryLogSink;
pub use log::NoopLogSink;
pub use log::SharedLogSink;
pub use log::StderrLogSink;
pub use protocol::FrameDisposition;
pub use protocol::Goodbye;
pub use protocol::Intent;
pub use protocol::IntentCode;
pub use protocol::ProtocolError;
pub use protocol::ProtocolFrame;
pub use protocol::Selector;
pub use protocol::StreamFrame;
pub use protocol::StreamProtocol;
pub use protocol::classify_frame;
pub use protocol::classify_frame_as;
pub use sdk_kind::FlagQuery;
pub use sdk_kind::FlagRequestMethod;
pub use sdk_kind::RequestTarget;
pub use sdk_kind::SdkKind;
pub use sdk_kind::SdkKindProfile;
pub use sse::SseDecoder;
pub use sse::SseEvent;
pub use status::ErrorClass;
pub use status::RECOVERABLE_STATUSES;
pub use status::UNRECOVERABLE_STATUSES;
pub use status::classify_status;
pub use store::ApplyOutcome;
pub use store::ChangeAction;
pub use store::EntityKind;
pub use store::ItemChange;
pub use store::StoredItem;
pub use store::VersionStore;
