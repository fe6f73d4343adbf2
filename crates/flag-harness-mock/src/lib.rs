// crates/flag-harness-mock/src/lib.rs
// ============================================================================
// Module: Flag Harness Mock
// Description: In-process mock of the feature-flag vendor backend.
// Purpose: Serve scripted stream, poll, event, and hook traffic to an SDK.
// Dependencies: axum, tokio, flate2, flag-harness-core
// ============================================================================

//! ## Overview
//! `flag-harness-mock` runs one HTTP listener per test scope and hosts any
//! number of [`Endpoint`]s on it. Each endpoint records every request in a
//! connection ledger and delegates to one [`EndpointHandler`]: a
//! [`StreamingService`], a [`PollingService`], an [`EventSink`] collector, a
//! hook callback queue, or a scripted failure.
//! Invariants:
//! - Pushed changes are staged and never appear in a transfer until a
//!   `payload-transferred` push commits them.
//! - Every wait is bounded by a caller-supplied timeout.
//! - Independent services share no mutable state unless explicitly given the
//!   same [`DataSource`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod endpoint;
pub mod error;
pub mod events;
pub mod handler;
pub mod hooks;
pub mod poll;
pub mod queue;
pub mod server;
pub mod source;
pub mod stream;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use endpoint::CancelSignal;
pub use endpoint::Connection;
pub use endpoint::Endpoint;
pub use endpoint::RequestRecord;
pub use error::MockError;
pub use events::AnalyticsEvent;
pub use events::EventBatch;
pub use events::EventSink;
pub use events::PAYLOAD_ID_HEADER;
pub use handler::BrokenConnectionHandler;
pub use handler::EndpointHandler;
pub use handler::JsonHandler;
pub use handler::SequentialHandler;
pub use handler::SharedHandler;
pub use handler::StatusHandler;
pub use handler::shared;
pub use hooks::HookCallbackService;
pub use hooks::HookExecutionPayload;
pub use hooks::HookStage;
pub use poll::PollingService;
pub use queue::BlockingQueue;
pub use server::MockServer;
pub use server::MockServerHandle;
pub use server::MockServerOptions;
pub use source::DataSource;
pub use source::StaleBasisPolicy;
pub use stream::StreamingOptions;
pub use stream::StreamingService;
