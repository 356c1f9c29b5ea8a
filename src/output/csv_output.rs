//! Per-page CSV output
//!
//! Every harvested page is written to `<directory>/<page>.csv` as soon as it
//! is complete, so a crash loses at most the page in flight. Files are
//! written to a temporary name first and renamed into place.

use crate::listing::PageResult;
use crate::output::traits::{PageSink, RunSummary};
use crate::OutputResult;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the run summary written next to the page files
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Page sink writing one CSV file per page
#[derive(Debug, Clone)]
pub struct CsvPageWriter {
    directory: PathBuf,
}

impl CsvPageWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Creates the output directory; with `fresh`, removes earlier results
    ///
    /// Only page files and the run summary are removed. Anything else in the
    /// directory is left alone.
    ///
    /// # Returns
    ///
    /// * `Ok(pages)` - Page numbers of files left over from earlier runs.
    ///   Always empty with `fresh`. Pages this run does not rewrite keep their
    ///   old rows and are picked up by a later merge.
    /// * `Err(OutputError)` - The directory could not be created or cleaned
    pub fn prepare(&self, fresh: bool) -> OutputResult<Vec<u32>> {
        fs::create_dir_all(&self.directory)?;

        let pages = page_files(&self.directory)?;

        if !fresh {
            let leftover: Vec<u32> = pages.iter().map(|(page, _)| *page).collect();
            if let (Some(first), Some(last)) = (leftover.first(), leftover.last()) {
                tracing::warn!(
                    "{} page files from earlier runs in {} (pages {} to {}); pages not rewritten by this run will still be merged, use --fresh to remove them",
                    leftover.len(),
                    self.directory.display(),
                    first,
                    last
                );
            }
            return Ok(leftover);
        }

        for (_, path) in &pages {
            fs::remove_file(path)?;
        }
        let summary = self.directory.join(SUMMARY_FILE);
        if summary.exists() {
            fs::remove_file(summary)?;
        }
        tracing::info!(
            "Removed {} page files from {}",
            pages.len(),
            self.directory.display()
        );

        Ok(Vec::new())
    }

    /// Path of the CSV file for one page
    pub fn page_path(&self, page: u32) -> PathBuf {
        self.directory.join(format!("{}.csv", page))
    }
}

impl PageSink for CsvPageWriter {
    fn write_page(&self, page: &PageResult) -> OutputResult<()> {
        if page.is_empty() {
            return Ok(());
        }

        let columns = page.columns();
        let target = self.page_path(page.page);

        write_atomically(&target, |writer| {
            writer.write_record(&columns)?;
            for row in &page.rows {
                writer.write_record(columns.iter().map(|c| row.get(c).unwrap_or("")))?;
            }
            Ok(())
        })?;

        tracing::debug!(
            "Wrote {} rows x {} columns to {}",
            page.len(),
            columns.len(),
            target.display()
        );
        Ok(())
    }

    fn finalize(&self, summary: &RunSummary) -> OutputResult<()> {
        let target = self.directory.join(SUMMARY_FILE);
        let tmp = temp_path(&target);
        fs::write(&tmp, serde_json::to_vec_pretty(summary)?)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}

/// Writes a CSV file under a temporary name, then renames it into place
pub(crate) fn write_atomically<F>(target: &Path, write: F) -> OutputResult<()>
where
    F: FnOnce(&mut csv::Writer<fs::File>) -> OutputResult<()>,
{
    let tmp = temp_path(target);
    let mut writer = csv::Writer::from_path(&tmp)?;

    if let Err(e) = write(&mut writer).and_then(|_| writer.flush().map_err(Into::into)) {
        drop(writer);
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    drop(writer);
    fs::rename(&tmp, target)?;
    Ok(())
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.tmp", name))
}

/// Lists the page files of a directory, ordered by page number
///
/// Only files named `<number>.csv` count as page files.
pub fn page_files(directory: &Path) -> OutputResult<Vec<(u32, PathBuf)>> {
    let mut pages = Vec::new();

    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let page = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u32>().ok());
        if let Some(page) = page {
            pages.push((page, path));
        }
    }

    pages.sort_by_key(|(page, _)| *page);
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{EnrichedRow, Record};
    use tempfile::TempDir;

    fn row(page: u32, pairs: &[(&str, &str)]) -> EnrichedRow {
        EnrichedRow {
            page,
            fields: Record::from_pairs(pairs.iter().copied()),
            degraded: false,
        }
    }

    #[test]
    fn test_write_page() {
        let dir = TempDir::new().unwrap();
        let writer = CsvPageWriter::new(dir.path());

        let page = PageResult::new(
            3,
            vec![
                row(3, &[("page", "3"), ("name", "A"), ("url", "https://x/1")]),
                row(3, &[("page", "3"), ("name", "B, annex"), ("layout", "1K")]),
            ],
        );
        writer.write_page(&page).unwrap();

        let content = fs::read_to_string(dir.path().join("3.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "page,name,url,layout");
        assert_eq!(lines[1], "3,A,https://x/1,");
        assert_eq!(lines[2], "3,\"B, annex\",,1K");
        assert!(!dir.path().join(".3.csv.tmp").exists());
    }

    #[test]
    fn test_empty_page_not_written() {
        let dir = TempDir::new().unwrap();
        let writer = CsvPageWriter::new(dir.path());
        writer.write_page(&PageResult::new(1, Vec::new())).unwrap();
        assert!(!writer.page_path(1).exists());
    }

    #[test]
    fn test_page_files_sorted_numerically() {
        let dir = TempDir::new().unwrap();
        for name in ["10.csv", "2.csv", "1.csv", "data.csv", "notes.txt"] {
            fs::write(dir.path().join(name), "a\n1\n").unwrap();
        }

        let pages: Vec<u32> = page_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(page, _)| page)
            .collect();
        assert_eq!(pages, vec![1, 2, 10]);
    }

    #[test]
    fn test_prepare_fresh_removes_only_page_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1.csv"), "a\n1\n").unwrap();
        fs::write(dir.path().join("keep.txt"), "x").unwrap();

        let writer = CsvPageWriter::new(dir.path());
        assert!(writer.prepare(true).unwrap().is_empty());

        assert!(!dir.path().join("1.csv").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_prepare_reports_pages_from_earlier_runs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("7.csv"), "a\n1\n").unwrap();
        fs::write(dir.path().join("3.csv"), "a\n1\n").unwrap();

        let writer = CsvPageWriter::new(dir.path());
        assert_eq!(writer.prepare(false).unwrap(), vec![3, 7]);
        assert!(dir.path().join("7.csv").exists());
    }

    #[test]
    fn test_prepare_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("out").join("pages");
        CsvPageWriter::new(&nested).prepare(false).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_finalize_writes_summary() {
        let dir = TempDir::new().unwrap();
        let writer = CsvPageWriter::new(dir.path());
        let summary = RunSummary {
            pages_visited: 12,
            rows: 40,
            ..RunSummary::new()
        };
        writer.finalize(&summary).unwrap();

        let content = fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        let loaded: RunSummary = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded, summary);
    }
}
