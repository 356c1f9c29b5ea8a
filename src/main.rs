//! Chintai-Harvest main entry point
//!
//! This is the command-line interface for the Chintai-Harvest listing harvester.

use anyhow::Context;
use chintai_harvest::config::{load_config_with_hash, Config};
use chintai_harvest::crawler::crawl;
use chintai_harvest::output::{load_statistics, merge_pages, page_files, print_statistics};
use chintai_harvest::url::page_url;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Chintai-Harvest: a rental listing harvester
///
/// Chintai-Harvest walks the paginated search results of a rental listing
/// site, enriches every unit with its detail page, and writes one CSV file
/// per page. Failed requests are retried through public proxies.
#[derive(Parser, Debug)]
#[command(name = "chintai-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A rental listing harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Remove page files from earlier runs before harvesting
    #[arg(long)]
    fresh: bool,

    /// First page to harvest (overrides crawl.start-page)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    start_page: Option<u32>,

    /// Maximum number of pages to harvest (overrides crawl.max-pages)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    max_pages: Option<u32>,

    /// Validate config and show what would be harvested without fetching anything
    #[arg(long, conflicts_with_all = ["stats", "merge"])]
    dry_run: bool,

    /// Show statistics about existing page files and exit
    #[arg(long, conflicts_with_all = ["dry_run", "merge"])]
    stats: bool,

    /// Merge existing page files into one deduplicated file and exit
    ///
    /// Every `<page>.csv` in the output directory is merged, including pages
    /// left over from earlier runs that were not started with --fresh.
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    merge: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(start_page) = cli.start_page {
        config.crawl.start_page = start_page;
    }
    if let Some(max_pages) = cli.max_pages {
        config.crawl.max_pages = Some(max_pages);
    }

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.merge {
        handle_merge(&config)
    } else {
        handle_crawl(config, cli.fresh, &config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("chintai_harvest=info,warn"),
            1 => EnvFilter::new("chintai_harvest=debug,info"),
            2 => EnvFilter::new("chintai_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Chintai-Harvest Dry Run ===\n");

    let first = page_url(&config.site.search_url, config.crawl.start_page)?;
    println!("Site:");
    println!("  Search URL: {}", config.site.search_url);
    println!("  First page: {}", first);
    println!("  Origin: {}", config.site.origin);

    println!("\nCrawl:");
    println!("  Start page: {}", config.crawl.start_page);
    match config.crawl.max_pages {
        Some(max) => println!("  Max pages: {}", max),
        None => println!("  Max pages: unbounded"),
    }
    println!(
        "  Stop after {} consecutive empty pages",
        config.crawl.failure_threshold
    );
    println!(
        "  Page attempts: {} ({}ms initial delay)",
        config.crawl.page_attempts, config.crawl.page_retry_delay_ms
    );
    println!("  Detail workers: {}", config.crawl.detail_workers);
    println!("  Strict columns: {}", config.crawl.strict_columns);

    println!("\nFetch:");
    println!(
        "  Timeouts: {}s connect, {}s read",
        config.fetch.connect_timeout_secs, config.fetch.read_timeout_secs
    );
    println!(
        "  Attempts: {} ({}ms base backoff)",
        config.fetch.max_attempts, config.fetch.backoff_ms
    );
    println!(
        "  User agents: default + up to {} of {}",
        config.fetch.rotate_user_agents,
        config.fetch.user_agents.len()
    );
    if !config.fetch.proxy_fallback {
        println!("  Proxy fallback: disabled");
    } else if config.fetch.proxies.is_empty() {
        println!(
            "  Proxy fallback: {} (cached {} days, {} concurrent)",
            config.fetch.proxy_source, config.fetch.proxy_cache_days, config.fetch.proxy_concurrency
        );
    } else {
        println!(
            "  Proxy fallback: {} static proxies ({} concurrent)",
            config.fetch.proxies.len(),
            config.fetch.proxy_concurrency
        );
    }

    println!("\nBuilding Fields ({}):", config.building_fields.len());
    for field in &config.building_fields {
        println!("  - {} ({})", field.name, field.css());
    }

    println!("\nOutput:");
    println!("  Page files: {}/<page>.csv", config.output.directory);
    println!("  Merged file: {}", config.output.merged_path);
    println!("  Dedupe key: {}", config.output.dedupe_key.join(", "));
    println!("  Ignored fields: {}", config.output.ignore_fields.join(", "));

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics about existing page files
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let directory = Path::new(&config.output.directory);
    println!("Output directory: {}\n", directory.display());

    let stats = load_statistics(directory)
        .with_context(|| format!("Failed to read {}", directory.display()))?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --merge mode: consolidates page files into one file
fn handle_merge(config: &Config) -> anyhow::Result<()> {
    let directory = Path::new(&config.output.directory);
    let merged = Path::new(&config.output.merged_path);

    println!("=== Merging Page Files ===\n");
    println!("Directory: {}", directory.display());
    println!("Output: {}", merged.display());
    println!();

    if page_files(directory)?.is_empty() {
        anyhow::bail!("No page files found in {}", directory.display());
    }

    let report = merge_pages(directory, merged, &config.output.dedupe_key)
        .with_context(|| format!("Failed to merge page files into {}", merged.display()))?;

    println!(
        "✓ Merged {} pages: {} rows written, {} duplicates dropped, {} columns",
        report.pages, report.rows_written, report.duplicates, report.columns
    );

    Ok(())
}

/// Handles the main harvest operation
async fn handle_crawl(config: Config, fresh: bool, config_hash: &str) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh harvest (removing earlier page files)");
    } else {
        tracing::info!("Starting harvest (existing page files are overwritten page by page)");
    }

    tracing::info!(
        "Building fields: {}, detail workers: {}, proxy fallback: {}",
        config.building_fields.len(),
        config.crawl.detail_workers,
        config.fetch.proxy_fallback
    );

    match crawl(config, fresh, config_hash).await {
        Ok(summary) => {
            tracing::info!(
                "Harvest completed successfully: {} rows from {} pages",
                summary.rows,
                summary.pages_harvested
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
