// crates/flag-harness-client/src/error.rs
// ============================================================================
// Module: Client Errors
// Description: Failures talking to the SDK test service.
// Purpose: Keep configuration, transport, and protocol failures distinct.
// Dependencies: thiserror
// ============================================================================

use std::time::Duration;

use thiserror::Error;

/// Test-service client errors.
///
/// Transport and protocol failures are fatal to the test that observed them;
/// the client never retries a command.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Client construction failed.
    #[error("client config error: {0}")]
    Config(String),
    /// A configurer chain produced an unusable SDK configuration.
    #[error("invalid sdk configuration: {0}")]
    InvalidConfiguration(String),
    /// The HTTP exchange failed.
    #[error("test service transport error: {0}")]
    Transport(String),
    /// The service answered with a non-success status.
    #[error("test service returned http status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Trimmed response body preview.
        body: String,
    },
    /// Request or response JSON could not be (de)serialized.
    #[error("test service json error: {0}")]
    Json(String),
    /// The service response violated the command protocol.
    #[error("test service protocol error: {0}")]
    Protocol(String),
    /// The command needs a capability the service did not declare.
    #[error("test service lacks capability {capability}")]
    MissingCapability {
        /// Capability name.
        capability: String,
    },
    /// The service did not become ready in time.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was awaited.
        what: String,
        /// How long the wait lasted.
        waited: Duration,
    },
    /// Response body exceeded the configured limit.
    #[error("test service response too large ({actual} > {limit})")]
    ResponseTooLarge {
        /// Actual size in bytes.
        actual: usize,
        /// Maximum allowed size in bytes.
        limit: usize,
    },
}
