//! Harvest coordinator - main page loop
//!
//! This module contains the loop that walks the search result pages, in
//! order, one page at a time:
//! - Fetching and parsing each index page, with page-level retries
//! - Enriching every unit row with its detail page, concurrently
//! - Handing the finished page to the output sink
//! - Stopping after too many consecutive empty or failed pages

use crate::config::Config;
use crate::crawler::detail::DetailParser;
use crate::crawler::fetcher::{FetchOptions, ResilientFetcher};
use crate::crawler::parser::PageParser;
use crate::crawler::scheduler::{PageOutcome, PageScheduler};
use crate::listing::{EnrichedRow, ListingDetail, PageResult, RawListing};
use crate::output::{PageSink, RunSummary};
use crate::state::PageState;
use crate::url::page_url;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Main harvest coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    fetcher: Arc<ResilientFetcher>,
    page_parser: PageParser,
    detail_parser: Arc<DetailParser>,
    sink: Box<dyn PageSink>,
    scheduler: PageScheduler,
    state: PageState,
    ignore: HashSet<String>,
    page_options: FetchOptions,
    detail_options: FetchOptions,
    summary: RunSummary,
}

impl Coordinator {
    /// Creates a new coordinator with a fetcher built from the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The harvester configuration
    /// * `sink` - Where finished pages are written
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(HarvestError)` - A selector, URL or HTTP client could not be built
    pub fn new(config: Config, sink: Box<dyn PageSink>) -> Result<Self> {
        let fetcher = Arc::new(ResilientFetcher::from_config(&config.fetch)?);
        Self::with_fetcher(config, fetcher, sink)
    }

    /// Creates a new coordinator around an existing fetcher
    pub fn with_fetcher(
        config: Config,
        fetcher: Arc<ResilientFetcher>,
        sink: Box<dyn PageSink>,
    ) -> Result<Self> {
        let page_parser = PageParser::from_config(&config)?;
        let detail_parser = Arc::new(DetailParser::from_config(&config.selectors)?);
        let scheduler = PageScheduler::from_config(&config.crawl);
        let ignore = config.output.ignore_fields.iter().cloned().collect();

        let page_options = FetchOptions {
            allow_proxy_fallback: config.fetch.proxy_fallback,
            ..FetchOptions::page()
        };
        let detail_options = FetchOptions {
            allow_proxy_fallback: config.fetch.proxy_fallback,
            ..FetchOptions::detail(config.crawl.detail_follow_redirects)
        };

        let summary = RunSummary {
            first_page: config.crawl.start_page,
            ..RunSummary::new()
        };

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            page_parser,
            detail_parser,
            sink,
            scheduler,
            state: PageState::Starting,
            ignore,
            page_options,
            detail_options,
            summary,
        })
    }

    /// Records the configuration hash in the run summary
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.summary.config_hash = hash.into();
        self
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    /// Runs the page loop until the scheduler ends the walk
    ///
    /// Empty and failed pages are not errors; they count toward the
    /// consecutive failure threshold. Only a failure to write output or an
    /// invalid phase transition aborts the run.
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Statistics of the finished run
    /// * `Err(HarvestError)` - Output could not be written
    pub async fn run(&mut self) -> Result<RunSummary> {
        tracing::info!(
            "Starting harvest at page {} (failure threshold {})",
            self.config.crawl.start_page,
            self.config.crawl.failure_threshold
        );

        self.summary.started_at = Some(chrono::Utc::now());
        let start_time = std::time::Instant::now();

        while let Some(page) = self.scheduler.next_page() {
            let outcome = self.harvest_page(page).await?;
            self.scheduler.record(outcome);

            self.summary.pages_visited += 1;
            self.summary.last_page = Some(page);
            match outcome {
                PageOutcome::Harvested { .. } => self.summary.pages_harvested += 1,
                PageOutcome::Empty => self.summary.pages_empty += 1,
                PageOutcome::Failed => self.summary.pages_failed += 1,
            }

            if self.summary.pages_visited % 10 == 0 {
                let rate = self.summary.rows as f64 / start_time.elapsed().as_secs_f64();
                tracing::info!(
                    "Progress: {} pages, {} rows, {:.2} rows/sec",
                    self.summary.pages_visited,
                    self.summary.rows,
                    rate
                );
            }
        }

        self.advance(PageState::Terminated)?;

        let termination = self.scheduler.termination();
        if let Some(reason) = &termination {
            tracing::info!("Harvest finished: {}", reason);
        }

        let stats = self.fetcher.stats();
        self.summary.termination = termination.map(|t| t.to_string());
        self.summary.finished_at = Some(chrono::Utc::now());
        self.summary.requests = stats.requests as u64;
        self.summary.proxy_races = stats.proxy_races as u64;
        self.summary.proxy_wins = stats.proxy_wins as u64;

        self.sink.finalize(&self.summary)?;

        tracing::info!(
            "Harvested {} rows ({} degraded) from {} of {} pages; {} proxy races, {} won",
            self.summary.rows,
            self.summary.degraded_rows,
            self.summary.pages_harvested,
            self.summary.pages_visited,
            self.summary.proxy_races,
            self.summary.proxy_wins
        );

        Ok(self.summary.clone())
    }

    /// Fetches, parses, enriches and persists one page
    ///
    /// # Returns
    ///
    /// * `Ok(PageOutcome)` - How the page ended
    /// * `Err(HarvestError)` - The page's rows could not be written
    pub async fn harvest_page(&mut self, page: u32) -> Result<PageOutcome> {
        let Some(listings) = self.fetch_listings(page).await? else {
            self.advance(PageState::NextPage)?;
            return Ok(PageOutcome::Failed);
        };

        if listings.is_empty() {
            tracing::info!(
                "Page {} has no listings ({} consecutive)",
                page,
                self.scheduler.consecutive_failures() + 1
            );
            self.advance(PageState::NextPage)?;
            return Ok(PageOutcome::Empty);
        }

        self.advance(PageState::EnrichingRows)?;
        let result = PageResult::new(page, self.enrich(listings).await);

        self.advance(PageState::Persisting)?;
        self.sink.write_page(&result)?;

        let degraded = result.degraded_count();
        self.summary.rows += result.len() as u64;
        self.summary.degraded_rows += degraded as u64;

        self.advance(PageState::NextPage)?;
        tracing::info!("Page {}: {} rows ({} degraded)", page, result.len(), degraded);

        Ok(PageOutcome::Harvested { rows: result.len() })
    }

    /// Fetches and parses an index page, retrying with a doubling delay
    ///
    /// Returns None when every attempt failed.
    async fn fetch_listings(&mut self, page: u32) -> Result<Option<Vec<RawListing>>> {
        let url = page_url(&self.config.site.search_url, page)?;
        let attempts = self.config.crawl.page_attempts.max(1);

        for attempt in 1..=attempts {
            self.advance(PageState::FetchingPage)?;
            tracing::debug!("Fetching page {} (attempt {}/{}): {}", page, attempt, attempts, url);

            match self.fetcher.fetch(url.as_str(), &self.page_options).await {
                Ok(html) => {
                    self.advance(PageState::ParsingPage)?;
                    match self.page_parser.parse_page(&html, page) {
                        Ok(listings) => return Ok(Some(listings)),
                        Err(e) => tracing::warn!(
                            "Page {} attempt {}/{} failed to parse: {}",
                            page,
                            attempt,
                            attempts,
                            e
                        ),
                    }
                }
                Err(e) => tracing::warn!(
                    "Page {} attempt {}/{} failed to fetch: {}",
                    page,
                    attempt,
                    attempts,
                    e
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(self.scheduler.retry_delay(attempt)).await;
            }
        }

        tracing::error!("Page {} failed after {} attempts", page, attempts);
        Ok(None)
    }

    /// Enriches every listing with its detail page
    ///
    /// Detail pages are fetched concurrently, at most `detail-workers` at a
    /// time. A listing whose detail page cannot be fetched or parsed keeps
    /// its listing fields only. Rows come back in source order.
    async fn enrich(&self, listings: Vec<RawListing>) -> Vec<EnrichedRow> {
        let semaphore = Arc::new(Semaphore::new(self.config.crawl.detail_workers.max(1)));
        let mut tasks = JoinSet::new();

        for (index, listing) in listings.iter().enumerate() {
            let Some(url) = listing.detail_url.clone() else {
                tracing::debug!("Listing {} on page {} has no detail link", index, listing.page);
                continue;
            };

            let semaphore = Arc::clone(&semaphore);
            let fetcher = Arc::clone(&self.fetcher);
            let parser = Arc::clone(&self.detail_parser);
            let options = self.detail_options.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let detail = match fetcher.fetch(&url, &options).await {
                    Ok(html) => parser.parse_detail(&html).map_err(crate::HarvestError::from),
                    Err(e) => Err(e.into()),
                };
                (index, url, detail)
            });
        }

        let mut details: Vec<Option<ListingDetail>> = vec![None; listings.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(detail))) => details[index] = Some(detail),
                Ok((_, url, Err(e))) => {
                    tracing::warn!("Keeping listing fields only for {}: {}", url, e)
                }
                Err(e) => tracing::error!("Detail task failed: {}", e),
            }
        }

        listings
            .iter()
            .zip(details.iter())
            .map(|(listing, detail)| EnrichedRow::merge(listing, detail.as_ref(), &self.ignore))
            .collect()
    }

    fn advance(&mut self, next: PageState) -> Result<()> {
        self.state = self.state.transition(next)?;
        Ok(())
    }
}
