//! URL helpers for Chintai-Harvest
//!
//! Builds search page URLs from the configured template and resolves the
//! relative detail links found on index pages.

use url::Url;

/// Placeholder substituted with the page number in the search URL template
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Builds the URL of one search result page
///
/// # Arguments
///
/// * `template` - Search URL containing a `{page}` placeholder
/// * `page` - 1-based page number
///
/// # Returns
///
/// * `Ok(Url)` - The page URL
/// * `Err(url::ParseError)` - The substituted template is not a valid URL
///
/// # Examples
///
/// ```
/// use chintai_harvest::url::page_url;
///
/// let url = page_url("https://example.com/list?ar=030&page={page}", 7).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/list?ar=030&page=7");
/// ```
pub fn page_url(template: &str, page: u32) -> Result<Url, url::ParseError> {
    Url::parse(&template.replace(PAGE_PLACEHOLDER, &page.to_string()))
}

/// Resolves a detail link against the site origin
///
/// Returns None if the link should be skipped:
/// - empty or fragment-only hrefs
/// - `javascript:` links
/// - anything that does not resolve to an HTTP(S) URL
pub fn resolve_link(origin: &Url, href: &str) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }

    match origin.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute)
        }
        _ => None,
    }
}
