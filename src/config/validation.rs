use crate::config::types::{
    Config, CrawlConfig, FetchConfig, FieldSelector, OutputConfig, SelectorConfig, SiteConfig,
};
use crate::proxy::ProxyEndpoint;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_fetch_config(&config.fetch)?;
    validate_crawl_config(&config.crawl)?;
    validate_output_config(&config.output)?;
    validate_selectors(&config.selectors)?;
    validate_building_fields(&config.building_fields)?;
    Ok(())
}

/// Validates the search URL template and origin
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    if !config.search_url.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "search-url must contain a {{page}} placeholder, got '{}'",
            config.search_url
        )));
    }

    let sample = config.search_url.replace("{page}", "1");
    Url::parse(&sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid search-url: {}", e)))?;

    let origin = Url::parse(&config.origin)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid origin: {}", e)))?;
    if origin.scheme() != "http" && origin.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "origin must use http or https, got '{}'",
            config.origin
        )));
    }

    Ok(())
}

/// Validates fetcher configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "fetch.max-attempts must be >= 1".to_string(),
        ));
    }

    if config.connect_timeout_secs == 0 || config.read_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch timeouts must be > 0 seconds".to_string(),
        ));
    }

    if config.default_user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "fetch.default-user-agent cannot be empty".to_string(),
        ));
    }

    if config.proxy_concurrency < 1 || config.proxy_concurrency > 1000 {
        return Err(ConfigError::Validation(format!(
            "fetch.proxy-concurrency must be between 1 and 1000, got {}",
            config.proxy_concurrency
        )));
    }

    if config.proxy_cache_days < 1 {
        return Err(ConfigError::Validation(
            "fetch.proxy-cache-days must be >= 1".to_string(),
        ));
    }

    for proxy in &config.proxies {
        proxy.parse::<ProxyEndpoint>().map_err(|e| {
            ConfigError::Validation(format!("Invalid proxy '{}': {}", proxy, e))
        })?;
    }

    if config.proxies.is_empty() {
        Url::parse(&config.proxy_source)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy-source: {}", e)))?;
    }

    Ok(())
}

/// Validates crawl configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.start_page < 1 {
        return Err(ConfigError::Validation(
            "crawl.start-page must be >= 1".to_string(),
        ));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "crawl.max-pages must be >= 1 when set".to_string(),
        ));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "crawl.failure-threshold must be >= 1".to_string(),
        ));
    }

    if config.page_attempts < 1 {
        return Err(ConfigError::Validation(
            "crawl.page-attempts must be >= 1".to_string(),
        ));
    }

    if config.detail_workers < 1 || config.detail_workers > 256 {
        return Err(ConfigError::Validation(format!(
            "crawl.detail-workers must be between 1 and 256, got {}",
            config.detail_workers
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "output.directory cannot be empty".to_string(),
        ));
    }

    if config.merged_path.is_empty() {
        return Err(ConfigError::Validation(
            "output.merged-path cannot be empty".to_string(),
        ));
    }

    if config.dedupe_key.is_empty() {
        return Err(ConfigError::Validation(
            "output.dedupe-key needs at least one column".to_string(),
        ));
    }

    Ok(())
}

/// Every structural selector must be valid CSS
fn validate_selectors(config: &SelectorConfig) -> Result<(), ConfigError> {
    for (name, selector) in [
        ("article", &config.article),
        ("unit-table", &config.unit_table),
        ("unit-row", &config.unit_row),
        ("header-cell", &config.header_cell),
        ("data-cell", &config.data_cell),
        ("detail-link", &config.detail_link),
        ("options", &config.options),
        ("attributes-table", &config.attributes_table),
    ] {
        validate_selector(name, selector)?;
    }
    Ok(())
}

/// Validates the declarative building-field list
fn validate_building_fields(fields: &[FieldSelector]) -> Result<(), ConfigError> {
    if fields.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[building-field]] is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for field in fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "building-field name cannot be empty".to_string(),
            ));
        }
        if field.tag.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "building-field '{}' has an empty tag",
                field.name
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "building-field '{}' is declared twice",
                field.name
            )));
        }
        validate_selector(&field.name, &field.css())?;
    }

    Ok(())
}

fn validate_selector(name: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("{} '{}': {:?}", name, selector, e)))
}
