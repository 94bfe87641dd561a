//! Fixed-window rate limiting.
//!
//! Each key counts requests inside a window that starts at its first hit
//! and resets once `window` has elapsed. Bursts of up to twice the limit
//! across a window edge are possible and accepted.
//!
//! When the counter store errors or does not answer within the configured
//! timeout the limiter admits the request and reports `degraded`.

pub mod key;
pub mod memory;
pub mod redis;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::StoreError;

pub use key::{normalize_phone, RateLimitKey, RouteClass};
pub use memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;
pub use store::{CounterStore, WindowHit};

/// How many requests a key may make per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRule {
    pub limit: u32,
    pub window: Duration,
}

impl LimitRule {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_seconds),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in_seconds: u64,
    /// The store was unavailable and the request was let through unchecked.
    pub degraded: bool,
}

impl Decision {
    fn from_hit(rule: LimitRule, hit: WindowHit) -> Self {
        let remaining = u64::from(rule.limit).saturating_sub(hit.count);
        Self {
            allowed: hit.count <= u64::from(rule.limit),
            remaining: u32::try_from(remaining).unwrap_or(rule.limit),
            reset_in_seconds: ceil_seconds(hit.resets_in),
            degraded: false,
        }
    }

    fn fail_open(rule: LimitRule) -> Self {
        Self {
            allowed: true,
            remaining: rule.limit,
            reset_in_seconds: ceil_seconds(rule.window),
            degraded: true,
        }
    }
}

fn ceil_seconds(d: Duration) -> u64 {
    u64::try_from(d.as_millis().div_ceil(1000)).unwrap_or(u64::MAX)
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, store_timeout: Duration) -> Self {
        Self {
            store,
            clock,
            store_timeout,
        }
    }

    /// Counts one request against `key` and decides whether it is admitted.
    ///
    /// Never fails: store errors are logged and turned into an admitting,
    /// degraded decision.
    pub async fn check_and_increment(&self, key: &RateLimitKey, rule: LimitRule) -> Decision {
        let now = self.clock.now();
        let hit = tokio::time::timeout(
            self.store_timeout,
            self.store.increment(key.as_str(), rule.window, now),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout));

        match hit {
            Ok(hit) => {
                let decision = Decision::from_hit(rule, hit);
                if !decision.allowed {
                    tracing::debug!(key = %key, count = hit.count, limit = rule.limit, "rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "rate limiter store unavailable, admitting request");
                Decision::fail_open(rule)
            }
        }
    }

    /// Purges entries idle for at least `idle_for`. Store failures are
    /// logged and reported as nothing removed.
    pub async fn sweep(&self, idle_for: Duration) -> usize {
        let now = self.clock.now();
        match tokio::time::timeout(self.store_timeout, self.store.purge_idle(idle_for, now))
            .await
            .unwrap_or(Err(StoreError::Timeout))
        {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(removed, "purged idle rate limit entries");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "rate limit sweep failed");
                0
            }
        }
    }
}
