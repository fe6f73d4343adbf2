// crates/flag-harness-core/src/status.rs
// ============================================================================
// Module: Backend Status Classes
// Description: Recoverable vs unrecoverable backend failures.
// Purpose: Encode which scripted failures an SDK must retry.
// Dependencies: stdlib
// ============================================================================

//! ## Overview
//! A data source that receives a recoverable failure retries with backoff; an
//! unrecoverable one gives up permanently. Transport-level failures (a
//! connection dropped mid-response) are always recoverable.

/// Statuses that must be retried.
pub const RECOVERABLE_STATUSES: [u16; 5] = [400, 408, 429, 500, 503];

/// Statuses that must stop the data source.
pub const UNRECOVERABLE_STATUSES: [u16; 3] = [401, 403, 405];

/// Failure class for a backend response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry after backoff.
    Recoverable,
    /// Stop retrying.
    Unrecoverable,
}

impl ErrorClass {
    /// Class of an I/O failure.
    pub const TRANSPORT: Self = Self::Recoverable;

    /// Returns true for recoverable failures.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Recoverable)
    }
}

/// Classifies an HTTP status; success and redirect statuses return `None`.
#[must_use]
pub const fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        400 | 408 | 429 => Some(ErrorClass::Recoverable),
        401..=499 => Some(ErrorClass::Unrecoverable),
        500..=599 => Some(ErrorClass::Recoverable),
        _ => None,
    }
}
