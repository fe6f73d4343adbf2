// system-tests/src/orchestration.rs
// ============================================================================
// Module: Orchestration Helpers
// Description: Bounded fan-in joins and deadline polling.
// Purpose: Wait on several independent sources without a shared barrier.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`join_bounded`] runs labelled futures concurrently, each under its own
//! timeout, and only returns once every one has finished or expired. A slow
//! source therefore never hides the outcome of the others, and the error names
//! every source that missed its deadline. [`wait_until`] polls a predicate
//! until it holds or a deadline passes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::error::HarnessError;

// ============================================================================
// SECTION: Bounded Join
// ============================================================================

/// A labelled future with its own timeout.
pub struct BoundedWait<F> {
    /// Label used in error messages.
    pub label: String,
    /// Per-wait timeout.
    pub timeout: Duration,
    /// Awaited work.
    pub future: F,
}

impl<F> BoundedWait<F> {
    /// Builds a bounded wait.
    pub fn new(label: impl Into<String>, timeout: Duration, future: F) -> Self {
        Self {
            label: label.into(),
            timeout,
            future,
        }
    }
}

/// Outcome of one wait inside the join.
enum WaitOutcome<T> {
    /// Finished successfully.
    Done(T),
    /// Finished with an error.
    Failed(String),
    /// Did not finish in time.
    Expired,
}

/// Runs every wait concurrently and returns results in input order.
///
/// # Errors
///
/// Returns [`HarnessError::Timeout`] naming every expired wait when any
/// expired, otherwise [`HarnessError::Failed`] naming every failed wait.
pub async fn join_bounded<F, T, E>(waits: Vec<BoundedWait<F>>) -> Result<Vec<T>, HarnessError>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let mut labels = Vec::with_capacity(waits.len());
    let mut longest = Duration::ZERO;
    let mut set = JoinSet::new();
    for (index, wait) in waits.into_iter().enumerate() {
        labels.push(wait.label);
        longest = longest.max(wait.timeout);
        let timeout = wait.timeout;
        let future = wait.future;
        set.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, future).await {
                Ok(Ok(value)) => WaitOutcome::Done(value),
                Ok(Err(err)) => WaitOutcome::Failed(err.to_string()),
                Err(_) => WaitOutcome::Expired,
            };
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<T>> = labels.iter().map(|_| None).collect();
    let mut expired = Vec::new();
    let mut failed = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (index, outcome) = joined.map_err(|err| HarnessError::Failed {
            what: "bounded join".to_string(),
            message: err.to_string(),
        })?;
        let label = labels.get(index).cloned().unwrap_or_default();
        match outcome {
            WaitOutcome::Done(value) => {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(value);
                }
            }
            WaitOutcome::Failed(message) => failed.push(format!("{label}: {message}")),
            WaitOutcome::Expired => expired.push(label),
        }
    }

    if !expired.is_empty() {
        expired.sort();
        return Err(HarnessError::Timeout {
            what: expired.join(", "),
            waited: longest,
        });
    }
    if !failed.is_empty() {
        failed.sort();
        return Err(HarnessError::Failed {
            what: format!("{} of {} waits", failed.len(), labels.len()),
            message: failed.join("; "),
        });
    }
    Ok(slots.into_iter().flatten().collect())
}

// ============================================================================
// SECTION: Deadline Polling
// ============================================================================

/// Interval between predicate checks.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Polls `predicate` until it returns true.
///
/// # Errors
///
/// Returns [`HarnessError::Timeout`] naming `what` when the deadline passes.
pub async fn wait_until<P>(what: &str, timeout: Duration, mut predicate: P) -> Result<(), HarnessError>
where
    P: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::Timeout {
                what: what.to_string(),
                waited: timeout,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
