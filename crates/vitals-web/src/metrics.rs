//! In-memory health-metric log, one list per identity.
//!
//! Stands in for the persistence collaborator; entries do not survive a
//! restart. Each identity keeps at most [`MAX_ENTRIES_PER_IDENTITY`]
//! entries, evicting the earliest recorded first.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::dto::MetricEntryDto;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Steps,
    HeartRate,
    WeightKg,
    SleepHours,
    WaterMl,
}

pub const MAX_ENTRIES_PER_IDENTITY: usize = 10_000;

#[derive(Debug)]
pub struct MetricLog {
    entries: DashMap<String, VecDeque<MetricEntryDto>>,
    per_identity: usize,
}

impl Default for MetricLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricLog {
    pub fn new() -> Self {
        Self::with_limit(MAX_ENTRIES_PER_IDENTITY)
    }

    pub fn with_limit(per_identity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            per_identity: per_identity.max(1),
        }
    }

    pub fn record(&self, identity: &str, entry: MetricEntryDto) {
        let mut list = self.entries.entry(identity.to_string()).or_default();
        list.push_back(entry);
        while list.len() > self.per_identity {
            list.pop_front();
        }
    }

    /// Entries for `identity`, newest first.
    pub fn list(&self, identity: &str, kind: Option<MetricKind>) -> Vec<MetricEntryDto> {
        let mut entries: Vec<MetricEntryDto> = self
            .entries
            .get(identity)
            .map(|list| {
                list.iter()
                    .filter(|e| kind.map_or(true, |k| e.kind == k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        entries
    }
}
