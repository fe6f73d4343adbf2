// crates/flag-harness-mock/src/queue.rs
// ============================================================================
// Module: Blocking Queue
// Description: FIFO queue with deadline-bounded waits.
// Purpose: Let tests block on captured activity without unbounded waits.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`BlockingQueue`] is the single primitive behind every "wait for the next
//! thing" query in the mock backend: event batches, diagnostic payloads, and
//! hook callbacks. Producers never block. Consumers wait at most the given
//! duration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

// ============================================================================
// SECTION: Queue
// ============================================================================

/// FIFO queue with timeout-bounded pops.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    /// Queued items.
    items: Mutex<VecDeque<T>>,
    /// Wakes a waiting consumer after a push.
    notify: Notify,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item and wakes one waiter.
    pub fn push(&self, item: T) {
        if let Ok(mut items) = self.items.lock() {
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Removes the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().ok().and_then(|mut items| items.pop_front())
    }

    /// Waits up to `timeout` for an item.
    pub async fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Waits `timeout` and returns the first item that arrives, if any.
    ///
    /// # Errors
    ///
    /// Returns the unexpected item when the queue does not stay empty.
    pub async fn expect_empty(&self, timeout: Duration) -> Result<(), T> {
        match self.pop(timeout).await {
            Some(item) => Err(item),
            None => Ok(()),
        }
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or_default()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every queued item.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().map(|mut items| items.drain(..).collect()).unwrap_or_default()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
