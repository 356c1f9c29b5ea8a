//! Page scheduling and termination
//!
//! Index pages are visited strictly in order, one at a time. The scheduler
//! hands out page numbers and decides when the walk is over:
//! - after `failure-threshold` consecutive empty or failed pages
//! - after `max-pages` pages, when a maximum is configured

use crate::config::CrawlConfig;
use std::fmt;
use std::time::Duration;

/// What happened to one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page produced rows
    Harvested { rows: usize },

    /// The page parsed but had no listings
    Empty,

    /// The page could not be fetched or parsed after all attempts
    Failed,
}

/// Why the walk stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Too many consecutive empty or failed pages
    FailureThreshold { consecutive: u32 },

    /// The configured page budget was used up
    MaxPages { pages: u32 },
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::FailureThreshold { consecutive } => {
                write!(f, "{} consecutive pages without listings", consecutive)
            }
            Termination::MaxPages { pages } => write!(f, "page limit of {} reached", pages),
        }
    }
}

/// Hands out page numbers and tracks consecutive failures
#[derive(Debug, Clone)]
pub struct PageScheduler {
    next_page: u32,
    max_pages: Option<u32>,
    failure_threshold: u32,
    consecutive_failures: u32,
    pages_scheduled: u32,
    page_retry_delay: Duration,
}

impl PageScheduler {
    pub fn new(start_page: u32, max_pages: Option<u32>, failure_threshold: u32) -> Self {
        Self {
            next_page: start_page.max(1),
            max_pages,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: 0,
            pages_scheduled: 0,
            page_retry_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        let mut scheduler = Self::new(config.start_page, config.max_pages, config.failure_threshold);
        scheduler.page_retry_delay = Duration::from_millis(config.page_retry_delay_ms);
        scheduler
    }

    /// Returns the next page to visit, or None once the walk is over
    pub fn next_page(&mut self) -> Option<u32> {
        if self.termination().is_some() {
            return None;
        }
        let page = self.next_page;
        self.next_page = self.next_page.saturating_add(1);
        self.pages_scheduled += 1;
        Some(page)
    }

    /// Records a page outcome; a harvested page resets the failure run
    pub fn record(&mut self, outcome: PageOutcome) {
        match outcome {
            PageOutcome::Harvested { .. } => self.consecutive_failures = 0,
            PageOutcome::Empty | PageOutcome::Failed => self.consecutive_failures += 1,
        }
    }

    /// Reports why the walk is over, if it is
    pub fn termination(&self) -> Option<Termination> {
        if self.consecutive_failures >= self.failure_threshold {
            return Some(Termination::FailureThreshold {
                consecutive: self.consecutive_failures,
            });
        }
        match self.max_pages {
            Some(max) if self.pages_scheduled >= max => Some(Termination::MaxPages { pages: max }),
            _ => None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn pages_scheduled(&self) -> u32 {
        self.pages_scheduled
    }

    /// Delay before re-attempting a page; doubles with every attempt
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.page_retry_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}
