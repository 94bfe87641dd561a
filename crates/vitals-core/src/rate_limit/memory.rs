//! Process-local counter store.
//!
//! Valid for single-process deployments only: counters are not shared
//! between server instances and do not survive a restart.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::store::{CounterStore, WindowHit};
use crate::error::StoreResult;

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u64,
    window_start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Sharded in-memory counters. The check-and-increment for a key runs while
/// holding that key's shard lock, which is also what `purge_idle` takes.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, WindowEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test-seams"))]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(any(test, feature = "test-seams"))]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn elapsed_since(start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - start).to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> StoreResult<WindowHit> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                window_start: now,
                last_seen: now,
            });

        if entry.count == 0 || elapsed_since(entry.window_start, now) >= window {
            entry.count = 1;
            entry.window_start = now;
        } else {
            entry.count += 1;
        }
        entry.last_seen = now;

        let resets_in = window.saturating_sub(elapsed_since(entry.window_start, now));
        Ok(WindowHit {
            count: entry.count,
            resets_in,
        })
    }

    async fn purge_idle(&self, idle_for: Duration, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = elapsed_since(entry.last_seen, now) < idle_for;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
