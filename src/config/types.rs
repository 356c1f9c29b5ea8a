use serde::Deserialize;

/// Main configuration structure for Chintai-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub selectors: SelectorConfig,
    /// Building-level fields, extracted in declaration order
    #[serde(rename = "building-field", default)]
    pub building_fields: Vec<FieldSelector>,
}

/// The site being harvested
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Search result URL with a `{page}` placeholder
    #[serde(rename = "search-url")]
    pub search_url: String,

    /// Origin that relative detail links are resolved against
    pub origin: String,
}

/// HTTP behaviour of the resilient fetcher
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(rename = "read-timeout-secs", default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Attempts per direct request for transient failures and 5xx
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff; attempt `n` waits `backoff-ms * 2^(n-1)`
    #[serde(rename = "backoff-ms", default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(rename = "default-user-agent", default = "default_user_agent")]
    pub default_user_agent: String,

    #[serde(rename = "user-agents", default)]
    pub user_agents: Vec<String>,

    /// How many extra user agents to try after the default one
    #[serde(rename = "rotate-user-agents", default = "default_rotate_user_agents")]
    pub rotate_user_agents: usize,

    #[serde(rename = "proxy-fallback", default = "default_true")]
    pub proxy_fallback: bool,

    /// Public page listing free proxies
    #[serde(rename = "proxy-source", default = "default_proxy_source")]
    pub proxy_source: String,

    /// Fixed proxy list; replaces the public source when non-empty
    #[serde(default)]
    pub proxies: Vec<String>,

    #[serde(rename = "proxy-cache-days", default = "default_proxy_cache_days")]
    pub proxy_cache_days: u32,

    #[serde(rename = "proxy-concurrency", default = "default_proxy_concurrency")]
    pub proxy_concurrency: usize,
}

/// Page traversal and enrichment behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    #[serde(rename = "start-page", default = "default_start_page")]
    pub start_page: u32,

    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u32>,

    /// Consecutive empty or failed pages before the crawl ends
    #[serde(rename = "failure-threshold", default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(rename = "page-attempts", default = "default_page_attempts")]
    pub page_attempts: u32,

    #[serde(rename = "page-retry-delay-ms", default = "default_page_retry_delay_ms")]
    pub page_retry_delay_ms: u64,

    #[serde(rename = "detail-workers", default = "default_detail_workers")]
    pub detail_workers: usize,

    #[serde(rename = "detail-follow-redirects", default = "default_true")]
    pub detail_follow_redirects: bool,

    /// Fail the page when a unit table has more or fewer cells than headers
    #[serde(rename = "strict-columns", default)]
    pub strict_columns: bool,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving one `<page>.csv` per page
    #[serde(default = "default_output_directory")]
    pub directory: String,

    /// Consolidated file written by the merge step
    #[serde(rename = "merged-path", default = "default_merged_path")]
    pub merged_path: String,

    /// Columns identifying a row when merging pages
    #[serde(rename = "dedupe-key", default = "default_dedupe_key")]
    pub dedupe_key: Vec<String>,

    /// Field names never written
    #[serde(rename = "ignore-fields", default = "default_ignore_fields")]
    pub ignore_fields: Vec<String>,
}

/// CSS selectors locating the structural parts of index and detail pages
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_article")]
    pub article: String,

    #[serde(rename = "unit-table", default = "default_unit_table")]
    pub unit_table: String,

    #[serde(rename = "unit-row", default = "default_unit_row")]
    pub unit_row: String,

    #[serde(rename = "header-cell", default = "default_header_cell")]
    pub header_cell: String,

    #[serde(rename = "data-cell", default = "default_data_cell")]
    pub data_cell: String,

    #[serde(rename = "detail-link", default = "default_detail_link")]
    pub detail_link: String,

    #[serde(default = "default_options")]
    pub options: String,

    #[serde(rename = "attributes-table", default = "default_attributes_table")]
    pub attributes_table: String,
}

/// A building-level field located by tag name and class attribute
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FieldSelector {
    pub name: String,
    pub tag: String,
    /// Space separated classes, all of which must be present
    pub class: String,
}

impl FieldSelector {
    /// Converts `tag` + `class` into a CSS selector string
    pub fn css(&self) -> String {
        let classes: String = self
            .class
            .split_whitespace()
            .map(|c| format!(".{}", c))
            .collect();
        format!("{}{}", self.tag.trim(), classes)
    }
}

fn default_connect_timeout() -> u64 {
    5
}
fn default_read_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    5000
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36".to_string()
}
fn default_rotate_user_agents() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_proxy_source() -> String {
    "https://free-proxy-list.net/".to_string()
}
fn default_proxy_cache_days() -> u32 {
    1
}
fn default_proxy_concurrency() -> usize {
    300
}
fn default_start_page() -> u32 {
    1
}
fn default_failure_threshold() -> u32 {
    10
}
fn default_page_attempts() -> u32 {
    3
}
fn default_page_retry_delay_ms() -> u64 {
    2000
}
fn default_detail_workers() -> usize {
    32
}
fn default_output_directory() -> String {
    "data".to_string()
}
fn default_merged_path() -> String {
    "data.csv".to_string()
}
fn default_dedupe_key() -> Vec<String> {
    vec!["title".to_string(), "url".to_string()]
}
fn default_ignore_fields() -> Vec<String> {
    vec!["お気に入り".to_string()]
}
fn default_article() -> String {
    "div.cassetteitem".to_string()
}
fn default_unit_table() -> String {
    "table.cassetteitem_other".to_string()
}
fn default_unit_row() -> String {
    "tbody".to_string()
}
fn default_header_cell() -> String {
    "th".to_string()
}
fn default_data_cell() -> String {
    "td".to_string()
}
fn default_detail_link() -> String {
    "td.ui-text--midium.ui-text--bold a".to_string()
}
fn default_options() -> String {
    "#bkdt-option ul li".to_string()
}
fn default_attributes_table() -> String {
    "table.table_gaiyou".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            default_user_agent: default_user_agent(),
            user_agents: Vec::new(),
            rotate_user_agents: default_rotate_user_agents(),
            proxy_fallback: true,
            proxy_source: default_proxy_source(),
            proxies: Vec::new(),
            proxy_cache_days: default_proxy_cache_days(),
            proxy_concurrency: default_proxy_concurrency(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_page: default_start_page(),
            max_pages: None,
            failure_threshold: default_failure_threshold(),
            page_attempts: default_page_attempts(),
            page_retry_delay_ms: default_page_retry_delay_ms(),
            detail_workers: default_detail_workers(),
            detail_follow_redirects: true,
            strict_columns: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            merged_path: default_merged_path(),
            dedupe_key: default_dedupe_key(),
            ignore_fields: default_ignore_fields(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            article: default_article(),
            unit_table: default_unit_table(),
            unit_row: default_unit_row(),
            header_cell: default_header_cell(),
            data_cell: default_data_cell(),
            detail_link: default_detail_link(),
            options: default_options(),
            attributes_table: default_attributes_table(),
        }
    }
}
