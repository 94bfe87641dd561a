//! Redis-backed counter store for multi-process deployments.
//!
//! # Key Pattern
//!
//! - `{prefix}{key}` - request count for the current window, expiring with it
//!
//! Increment, first-hit expiry and TTL read run as one Lua script so the
//! window cannot be left without an expiry between commands.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{error, warn};

use super::store::{CounterStore, WindowHit};
use crate::error::{StoreError, StoreResult};

/// KEYS[1] = counter key, ARGV[1] = window in milliseconds.
/// Returns {count, remaining ttl in milliseconds}.
const INCREMENT_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Cheaply cloneable; the multiplexed connection is shared by all clones.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: MultiplexedConnection,
    prefix: String,
    increment_script: Script,
}

impl RedisCounterStore {
    /// Connects to `redis_url`. Counter keys are namespaced under `prefix`.
    pub async fn connect(redis_url: &str, prefix: &str) -> StoreResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            // The URL may embed credentials, so it is not logged.
            error!(error = %e, "Failed to open Redis client");
            StoreError::Unavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to Redis");
                StoreError::Unavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            increment_script: Script::new(INCREMENT_WINDOW),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration, _now: DateTime<Utc>) -> StoreResult<WindowHit> {
        let mut conn = self.connection.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);

        let (count, ttl_ms): (i64, i64) = self
            .increment_script
            .key(format!("{}{}", self.prefix, key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(error = %e, key, "Redis increment failed");
                StoreError::Unavailable(e.to_string())
            })?;

        Ok(WindowHit {
            count: u64::try_from(count).unwrap_or(0),
            resets_in: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    /// Redis expires windows itself.
    async fn purge_idle(&self, _idle_for: Duration, _now: DateTime<Utc>) -> StoreResult<usize> {
        Ok(0)
    }
}
