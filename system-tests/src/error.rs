// system-tests/src/error.rs
// ============================================================================
// Module: Harness Errors
// Description: Failures raised while wiring or waiting inside a test scope.
// Purpose: Wrap component errors and name every expired wait.
// Dependencies: thiserror, flag-harness-client, flag-harness-config, flag-harness-mock
// ============================================================================

use std::time::Duration;

use flag_harness_client::ClientError;
use flag_harness_config::ConfigError;
use flag_harness_mock::MockError;
use thiserror::Error;

/// Test scope errors.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Mock backend failure.
    #[error(transparent)]
    Mock(#[from] MockError),
    /// Test-service failure.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// A bounded wait expired.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was awaited.
        what: String,
        /// How long the wait lasted.
        waited: Duration,
    },
    /// One or more joined waits failed.
    #[error("{what} failed: {message}")]
    Failed {
        /// Failed wait labels.
        what: String,
        /// Combined failure messages.
        message: String,
    },
}
