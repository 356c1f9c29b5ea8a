//! Chintai-Harvest: a rental listing harvester
//!
//! This crate walks the paginated search results of a rental housing site,
//! enriches every unit row with its detail page, and streams the rows to
//! per-page CSV files. Direct requests that fail fall back to racing the same
//! request through a pool of public proxies.

pub mod config;
pub mod crawler;
pub mod listing;
pub mod output;
pub mod proxy;
pub mod state;
pub mod text;
pub mod url;

use thiserror::Error;

/// Main error type for Chintai-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::PageState,
        to: state::PageState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// Errors raised while fetching a document
///
/// Only `NetworkTransient` is retried inside the fetcher. Every other variant
/// is final for the fetch that produced it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Transient network failure for {url}: {message}")]
    NetworkTransient { url: String, message: String },

    #[error("Zero length content from {url}")]
    EmptyContent { url: String },

    #[error("Direct request for {url} failed: {reason}")]
    DirectFetchFailed { url: String, reason: String },

    #[error("Proxy source unavailable: {0}")]
    ProxySourceUnavailable(String),

    #[error("All {attempted} proxied requests for {url} failed")]
    AllProxiesExhausted { url: String, attempted: usize },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Errors raised while extracting rows from a document
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Page {page} could not be parsed: {message}")]
    PageParse { page: u32, message: String },

    #[error("Page {page}, article {article}: {headers} headers but {cells} cells")]
    ColumnMismatch {
        page: u32,
        article: usize,
        headers: usize,
        cells: usize,
    },

    #[error("Options block missing from detail page")]
    OptionsBlockMissing,

    #[error("Detail page could not be parsed: {0}")]
    DetailParse(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

/// Errors raised while persisting or reading back the dataset
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed output file {path}: {message}")]
    Malformed { path: String, message: String },
}

/// Result type alias for Chintai-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for fetch operations
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for parse operations
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Result type alias for output operations
pub type OutputResult<T> = std::result::Result<T, OutputError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, ResilientFetcher};
pub use listing::{EnrichedRow, PageResult, RawListing, Record};
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use state::PageState;
pub use text::pretty_text;
