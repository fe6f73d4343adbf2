// crates/flag-harness-mock/src/error.rs
// ============================================================================
// Module: Mock Errors
// Description: Failures raised by mock endpoints and services.
// Purpose: Name what was awaited or mis-wired so failures read unambiguously.
// Dependencies: thiserror
// ============================================================================

use std::time::Duration;

use thiserror::Error;

/// Mock backend errors.
#[derive(Debug, Error)]
pub enum MockError {
    /// Listener or runtime setup failed.
    #[error("mock server startup failed: {0}")]
    Startup(String),
    /// A wait expired before the awaited activity happened.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was awaited.
        what: String,
        /// How long the wait lasted.
        waited: Duration,
    },
    /// A connection arrived while none was expected.
    #[error("unexpected connection to {endpoint}: {request}")]
    UnexpectedConnection {
        /// Endpoint base URL.
        endpoint: String,
        /// Method and path of the request.
        request: String,
    },
    /// Activity arrived on a queue that was expected to stay empty.
    #[error("unexpected {what}: {detail}")]
    Unexpected {
        /// Queue description.
        what: String,
        /// Received item summary.
        detail: String,
    },
    /// Harness components were wired together incorrectly.
    #[error("harness wiring error: {0}")]
    Wiring(String),
    /// A posted payload could not be decoded.
    #[error("payload decode error: {0}")]
    Decode(String),
}

impl MockError {
    /// Builds a timeout error.
    #[must_use]
    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            waited,
        }
    }

    /// Returns true for timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
