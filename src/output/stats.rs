//! Statistics over an existing output directory
//!
//! This module provides functionality for summarising the page files a
//! harvest left behind, together with the summary of the last run.

use crate::output::csv_output::{page_files, SUMMARY_FILE};
use crate::output::traits::RunSummary;
use crate::{OutputError, OutputResult};
use std::collections::HashSet;
use std::path::Path;

/// Output directory statistics
#[derive(Debug, Clone, Default)]
pub struct OutputStatistics {
    /// Number of `<page>.csv` files
    pub page_files: u64,

    /// Total data rows across page files
    pub rows: u64,

    /// Number of distinct column names across page files
    pub distinct_columns: u64,

    /// Lowest and highest page numbers present
    pub first_page: Option<u32>,
    pub last_page: Option<u32>,

    /// Page numbers missing between the first and last page
    pub missing_pages: Vec<u32>,

    /// Summary of the most recent run, if one was recorded
    pub last_run: Option<RunSummary>,
}

/// Loads statistics from an output directory
///
/// # Arguments
///
/// * `directory` - The output directory to scan
///
/// # Returns
///
/// * `Ok(OutputStatistics)` - Successfully loaded statistics
/// * `Err(OutputError)` - A page file or the run summary could not be read
pub fn load_statistics(directory: &Path) -> OutputResult<OutputStatistics> {
    let pages = page_files(directory)?;

    let mut rows = 0;
    let mut columns = HashSet::new();
    for (_, path) in &pages {
        let mut reader = csv::Reader::from_path(path)?;
        for header in reader.headers()?.iter() {
            columns.insert(header.to_string());
        }
        for record in reader.records() {
            record?;
            rows += 1;
        }
    }

    let numbers: Vec<u32> = pages.iter().map(|(page, _)| *page).collect();
    let present: HashSet<u32> = numbers.iter().copied().collect();
    let first_page = numbers.first().copied();
    let last_page = numbers.last().copied();
    let missing_pages = match (first_page, last_page) {
        (Some(first), Some(last)) => (first..=last).filter(|p| !present.contains(p)).collect(),
        _ => Vec::new(),
    };

    let summary_path = directory.join(SUMMARY_FILE);
    let last_run = if summary_path.exists() {
        let content = std::fs::read_to_string(&summary_path)?;
        let summary = serde_json::from_str(&content).map_err(|e| OutputError::Malformed {
            path: summary_path.display().to_string(),
            message: e.to_string(),
        })?;
        Some(summary)
    } else {
        None
    };

    Ok(OutputStatistics {
        page_files: pages.len() as u64,
        rows,
        distinct_columns: columns.len() as u64,
        first_page,
        last_page,
        missing_pages,
        last_run,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &OutputStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Page files: {}", stats.page_files);
    println!("  Rows: {}", stats.rows);
    println!("  Distinct columns: {}", stats.distinct_columns);
    match (stats.first_page, stats.last_page) {
        (Some(first), Some(last)) => println!("  Pages: {} - {}", first, last),
        _ => println!("  Pages: none"),
    }
    println!();

    if !stats.missing_pages.is_empty() {
        println!("Missing Pages ({}):", stats.missing_pages.len());
        for page in &stats.missing_pages {
            println!("  - {}", page);
        }
        println!();
    }

    if let Some(run) = &stats.last_run {
        println!("Last Run:");
        if let Some(started) = run.started_at {
            println!("  Started: {}", started.to_rfc3339());
        }
        if let Some(seconds) = run.duration_seconds() {
            println!("  Duration: {}s", seconds);
        }
        if let Some(reason) = &run.termination {
            println!("  Stopped: {}", reason);
        }
        println!(
            "  Pages: {} visited, {} harvested, {} empty, {} failed",
            run.pages_visited, run.pages_harvested, run.pages_empty, run.pages_failed
        );
        println!(
            "  Rows: {} ({} degraded, {:.1}%)",
            run.rows,
            run.degraded_rows,
            run.degraded_rate()
        );
        println!(
            "  Proxy races: {} ({} won)",
            run.proxy_races, run.proxy_wins
        );
        println!();
    }

    let average = if stats.page_files > 0 {
        stats.rows as f64 / stats.page_files as f64
    } else {
        0.0
    };
    println!("Average rows per page: {:.1}", average);
}
