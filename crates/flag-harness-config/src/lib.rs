// crates/flag-harness-config/src/lib.rs
// ============================================================================
// Module: Flag Harness Config Library
// Description: Harness configuration model and environment overrides.
// Purpose: Single source of truth for flag-harness.toml semantics.
// Dependencies: flag-harness-core, serde, toml
// ============================================================================

//! ## Overview
//! `flag-harness-config` defines how a conformance run is parameterized: the
//! mock server bind host, the test-service URL, default credentials, wait
//! timeouts, and the log sink. Configuration comes from an optional TOML file
//! followed by environment overrides, and fails closed on invalid values.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod env;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use env::EnvOverrides;
pub use env::HarnessEnv;
