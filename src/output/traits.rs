//! Output sink trait and run summary types
//!
//! This module defines the trait interface for page sinks and the summary
//! recorded when a harvest run ends.

use crate::listing::PageResult;
use crate::OutputResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary statistics for one harvest run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    // Run metadata
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_hash: String,
    pub first_page: u32,
    pub last_page: Option<u32>,
    pub termination: Option<String>,

    // Page breakdown
    pub pages_visited: u64,
    pub pages_harvested: u64,
    pub pages_empty: u64,
    pub pages_failed: u64,

    // Row breakdown
    pub rows: u64,
    pub degraded_rows: u64,

    // Fetcher activity
    pub requests: u64,
    pub proxy_races: u64,
    pub proxy_wins: u64,
}

impl RunSummary {
    /// Creates a new empty run summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration of the run in seconds, once it has finished
    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_seconds()),
            _ => None,
        }
    }

    /// Returns the share of visited pages that produced rows, as a percentage
    pub fn harvest_rate(&self) -> f64 {
        if self.pages_visited == 0 {
            return 0.0;
        }
        (self.pages_harvested as f64 / self.pages_visited as f64) * 100.0
    }

    /// Returns the share of rows missing their detail attributes, as a percentage
    pub fn degraded_rate(&self) -> f64 {
        if self.rows == 0 {
            return 0.0;
        }
        (self.degraded_rows as f64 / self.rows as f64) * 100.0
    }
}

/// Trait for page sinks
///
/// A sink receives every non-empty page right after it was harvested, in
/// page order. Implementations must be thread-safe.
pub trait PageSink: Send + Sync {
    /// Persists the rows of one page
    ///
    /// # Arguments
    ///
    /// * `page` - The page's rows in source order
    fn write_page(&self, page: &PageResult) -> OutputResult<()>;

    /// Finalizes the output once the run is over
    ///
    /// # Arguments
    ///
    /// * `summary` - Statistics of the finished run
    fn finalize(&self, summary: &RunSummary) -> OutputResult<()>;
}
