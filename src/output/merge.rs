//! Consolidation of per-page CSV files
//!
//! The merge step reads every `<page>.csv` of the output directory in page
//! order and writes one file holding the union of their columns. Rows that
//! repeat an earlier row's dedupe key are dropped.

use crate::listing::Record;
use crate::output::csv_output::{page_files, write_atomically};
use crate::OutputResult;
use std::collections::HashSet;
use std::path::Path;

/// What the merge step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub pages: usize,
    pub rows_read: usize,
    pub rows_written: usize,
    pub duplicates: usize,
    pub columns: usize,
}

/// Merges the per-page CSV files into one deduplicated file
///
/// Columns appear in first-seen order across pages. A row's identity is the
/// tuple of its `dedupe_key` columns; the first row with a given identity is
/// kept. Rows where every key column is empty are never treated as
/// duplicates.
///
/// # Arguments
///
/// * `directory` - Directory holding the page files
/// * `merged_path` - Destination of the consolidated file
/// * `dedupe_key` - Columns identifying a row
///
/// # Returns
///
/// * `Ok(MergeReport)` - Counts of pages, rows and duplicates; nothing is
///   written when the directory holds no page files
/// * `Err(OutputError)` - A page file could not be read or the result written
pub fn merge_pages(
    directory: &Path,
    merged_path: &Path,
    dedupe_key: &[String],
) -> OutputResult<MergeReport> {
    let pages = page_files(directory)?;
    let mut report = MergeReport {
        pages: pages.len(),
        ..MergeReport::default()
    };

    if pages.is_empty() {
        tracing::warn!("No page files found in {}", directory.display());
        return Ok(report);
    }

    let mut columns: Vec<String> = Vec::new();
    let mut known_columns: HashSet<String> = HashSet::new();
    let mut seen_keys: HashSet<Vec<String>> = HashSet::new();
    let mut rows: Vec<Record> = Vec::new();

    for (page, path) in &pages {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        for header in headers.iter() {
            if known_columns.insert(header.to_string()) {
                columns.push(header.to_string());
            }
        }

        for record in reader.records() {
            let record = record?;
            report.rows_read += 1;

            let row = Record::from_pairs(headers.iter().zip(record.iter()));
            let key: Vec<String> = dedupe_key
                .iter()
                .map(|column| row.get(column).unwrap_or("").to_string())
                .collect();

            if key.iter().any(|value| !value.is_empty()) && !seen_keys.insert(key) {
                report.duplicates += 1;
                continue;
            }
            rows.push(row);
        }

        tracing::debug!("Merged page {} from {}", page, path.display());
    }

    if let Some(parent) = merged_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    write_atomically(merged_path, |writer| {
        writer.write_record(&columns)?;
        for row in &rows {
            writer.write_record(columns.iter().map(|c| row.get(c).unwrap_or("")))?;
        }
        Ok(())
    })?;

    report.rows_written = rows.len();
    report.columns = columns.len();

    tracing::info!(
        "Merged {} pages into {}: {} rows, {} duplicates dropped",
        report.pages,
        merged_path.display(),
        report.rows_written,
        report.duplicates
    );

    Ok(report)
}
