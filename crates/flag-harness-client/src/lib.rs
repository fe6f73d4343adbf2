// crates/flag-harness-client/src/lib.rs
// ============================================================================
// Module: Flag Harness Client
// Description: Driver for SDK-under-test processes behind a test service.
// Purpose: Compose SDK configurations and issue typed commands.
// Dependencies: reqwest, serde, tokio, url, flag-harness-core
// ============================================================================

//! ## Overview
//! `flag-harness-client` drives an SDK through its test service. A
//! [`ConfigurerChain`] composes the [`SdkConfigParams`] for one instance,
//! [`TestServiceClient`] creates the instance, and the returned
//! [`SdkClientHandle`] sends typed [`Command`]s until it is closed or dropped.
//! Invariants:
//! - Every command is one request with one typed response and is never retried.
//! - Instances are independent; closing one never touches another.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod commands;
pub mod configurer;
pub mod error;
pub mod handle;
pub mod params;
pub mod service;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use commands::AliasEventParams;
pub use commands::BigSegmentStoreStatusParams;
pub use commands::BigSegmentStoreStatusResponse;
pub use commands::Command;
pub use commands::CustomEventParams;
pub use commands::EvaluateAllFlagsParams;
pub use commands::EvaluateAllFlagsResponse;
pub use commands::EvaluateFlagParams;
pub use commands::EvaluateFlagResponse;
pub use commands::FlushEventsParams;
pub use commands::HookQueryParams;
pub use commands::HookQueryResponse;
pub use commands::IdentifyEventParams;
pub use commands::IdentifyParams;
pub use commands::MigrationOperationParams;
pub use commands::MigrationOperationResponse;
pub use commands::MigrationVariationParams;
pub use commands::MigrationVariationResponse;
pub use commands::NoResponse;
pub use commands::OpenFeatureEvaluateParams;
pub use commands::OpenFeatureEvaluateResponse;
pub use configurer::Configurer;
pub use configurer::ConfigurerChain;
pub use configurer::ConfigurerKind;
pub use configurer::validate_params;
pub use error::ClientError;
pub use handle::SdkClientHandle;
pub use params::ClientSideParams;
pub use params::EventParams;
pub use params::HookInstanceParams;
pub use params::HookParams;
pub use params::PollingParams;
pub use params::SdkConfigParams;
pub use params::StreamingParams;
pub use params::TagParams;
pub use service::MAX_SERVICE_RESPONSE_BYTES;
pub use service::ServiceStatus;
pub use service::TestServiceClient;
pub use service::TestServiceConfig;
