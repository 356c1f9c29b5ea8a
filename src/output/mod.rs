//! Output module for persisting harvested rows and reporting on them
//!
//! This module handles:
//! - Streaming each page's rows to its own CSV file
//! - Consolidating the page files into one deduplicated dataset
//! - Recording and displaying run statistics

mod csv_output;
mod merge;
pub mod stats;
mod traits;

pub use csv_output::{page_files, CsvPageWriter, SUMMARY_FILE};
pub use merge::{merge_pages, MergeReport};
pub use stats::{load_statistics, print_statistics, OutputStatistics};
pub use traits::{PageSink, RunSummary};
