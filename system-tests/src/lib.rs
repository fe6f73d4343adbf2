// system-tests/src/lib.rs
// ============================================================================
// Module: Flag Harness System Tests Library
// Description: Test scope and orchestration helpers for conformance suites.
// Purpose: Wire the mock backend and test-service client together per test.
// Dependencies: flag-harness-client, flag-harness-config, flag-harness-mock
// ============================================================================

//! ## Overview
//! This crate hosts the [`TestHarness`] scope used by the conformance suites in
//! `system-tests/tests`, plus bounded fan-in helpers for waiting on several
//! sources at once.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod error;
pub mod harness;
pub mod orchestration;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use error::HarnessError;
pub use harness::TestHarness;
pub use orchestration::BoundedWait;
pub use orchestration::join_bounded;
pub use orchestration::wait_until;
