//! The single persisted aggregate document and its counters.
//!
//! Every field deserializes with a default so documents written before a
//! counter existed still load as valid state rather than as corruption.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw-log capacity; the oldest entries are evicted past this point.
pub const DEFAULT_MAX_RETAINED_EVENTS: usize = 10_000;

/// Success / failure counters for one dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetCounts {
    pub success: u64,
    pub fail: u64,
}

impl DatasetCounts {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.success + self.fail
    }
}

/// Feedback counters. `short` / `comprehensive` mirror the legacy level
/// spellings and are maintained alongside `quick` / `detailed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackCounts {
    pub quick: u64,
    pub detailed: u64,
    pub short: u64,
    pub comprehensive: u64,
    pub with_logs: u64,
    pub by_rating: BTreeMap<String, u64>,
}

/// Cumulative statistics. Never reduced by raw-log eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateCounts {
    pub total_successful_runs: u64,
    pub total_failed_runs: u64,
    pub per_dataset: BTreeMap<String, DatasetCounts>,
    pub feedback_count: FeedbackCounts,
}

impl AggregateCounts {
    /// Download events ever aggregated.
    #[must_use]
    pub const fn total_runs(&self) -> u64 {
        self.total_successful_runs + self.total_failed_runs
    }
}

/// The sole persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryDocument {
    pub counts: AggregateCounts,
    /// Raw payloads in arrival order, oldest first.
    pub events: Vec<Value>,
    pub created_at: String,
    pub last_updated: Option<String>,
}

impl TelemetryDocument {
    /// Fresh zeroed document stamped with `now`.
    #[must_use]
    pub fn bootstrap(now: DateTime<Utc>) -> Self {
        Self {
            counts: AggregateCounts::default(),
            events: Vec::new(),
            created_at: format_timestamp(now),
            last_updated: None,
        }
    }

    #[must_use]
    pub fn total_events(&self) -> usize {
        self.events.len()
    }

    /// `true` for a document no write has touched yet.
    #[must_use]
    pub fn is_pristine(&self) -> bool {
        self.last_updated.is_none()
            && self.events.is_empty()
            && self.counts == AggregateCounts::default()
    }
}

impl Default for TelemetryDocument {
    fn default() -> Self {
        Self::bootstrap(Utc::now())
    }
}

/// RFC 3339 UTC with millisecond precision, matching the activity log.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
