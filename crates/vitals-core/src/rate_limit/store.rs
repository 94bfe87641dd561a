//! Counter store contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;

/// Result of one increment inside a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Time left until the window resets.
    pub resets_in: Duration,
}

/// Key to count storage with fixed-window expiry.
///
/// `increment` must be atomic per key: concurrent callers on the same key
/// each observe a distinct count. Calls on different keys must not
/// serialise behind a single lock.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Counts one request against `key`, opening a new window of length
    /// `window` when none exists or the current one has elapsed.
    async fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> StoreResult<WindowHit>;

    /// Drops entries untouched for at least `idle_for`. Returns how many
    /// were removed.
    async fn purge_idle(&self, idle_for: Duration, now: DateTime<Utc>) -> StoreResult<usize>;
}
