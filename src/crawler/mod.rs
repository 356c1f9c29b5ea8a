//! Harvester module for page fetching and processing
//!
//! This module contains the core harvesting logic, including:
//! - HTTP fetching with retries and proxy fallback
//! - Index and detail page parsing
//! - Page scheduling and termination
//! - Overall harvest coordination

mod coordinator;
mod detail;
mod fetcher;
mod parser;
mod scheduler;

pub use coordinator::Coordinator;
pub use detail::DetailParser;
pub use fetcher::{
    build_http_client, ClientSettings, FetchOptions, FetchStats, ResilientFetcher,
    UserAgentRotation,
};
pub use parser::PageParser;
pub use scheduler::{PageOutcome, PageScheduler, Termination};

pub use crate::listing::ListingDetail;

use crate::config::Config;
use crate::output::{CsvPageWriter, RunSummary};
use crate::Result;

/// Runs a complete harvest
///
/// This is the main entry point for starting a harvest. It will:
/// 1. Prepare the output directory
/// 2. Build the fetcher, proxy pool and parsers
/// 3. Walk the search pages until the scheduler stops
/// 4. Write the run summary
///
/// # Arguments
///
/// * `config` - The harvester configuration
/// * `fresh` - Remove page files left by earlier runs first
/// * `config_hash` - Hash of the configuration file, recorded in the summary
///
/// # Returns
///
/// * `Ok(RunSummary)` - Harvest completed
/// * `Err(HarvestError)` - Harvest could not start or its output could not be written
pub async fn crawl(config: Config, fresh: bool, config_hash: &str) -> Result<RunSummary> {
    let writer = CsvPageWriter::new(&config.output.directory);
    let before_start = writer
        .prepare(fresh)?
        .into_iter()
        .filter(|page| *page < config.crawl.start_page)
        .count();
    if before_start > 0 {
        tracing::info!(
            "{} earlier page files precede start page {} and are not rewritten",
            before_start,
            config.crawl.start_page
        );
    }

    let mut coordinator = Coordinator::new(config, Box::new(writer))?.with_config_hash(config_hash);
    coordinator.run().await
}
