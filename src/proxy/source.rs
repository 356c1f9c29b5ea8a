//! Parsing of the public proxy list page
//!
//! The page carries an HTML table with (among others) `IP Address` and
//! `Port` columns. Columns are located by header name, not position.

use crate::proxy::ProxyEndpoint;
use crate::{FetchError, FetchResult};
use scraper::{ElementRef, Html, Selector};

const HOST_HEADER: &str = "IP Address";
const PORT_HEADER: &str = "Port";

/// Extracts proxy endpoints from the proxy list page, in table order
///
/// The first table whose headers include both `IP Address` and `Port` is
/// used. Rows with an empty host or a non-numeric port are skipped.
///
/// # Returns
///
/// * `Ok(Vec<ProxyEndpoint>)` - The endpoints, possibly empty
/// * `Err(FetchError::ProxySourceUnavailable)` - No matching table exists
pub fn parse_proxy_table(html: &str) -> FetchResult<Vec<ProxyEndpoint>> {
    let document = Html::parse_document(html);

    let table_selector = selector("table")?;
    let header_selector = selector("th")?;
    let row_selector = selector("tr")?;
    let cell_selector = selector("td")?;

    for table in document.select(&table_selector) {
        let headers: Vec<String> = table
            .select(&header_selector)
            .map(|th| cell_text(&th))
            .collect();

        let host_idx = headers.iter().position(|h| h == HOST_HEADER);
        let port_idx = headers.iter().position(|h| h == PORT_HEADER);
        let (Some(host_idx), Some(port_idx)) = (host_idx, port_idx) else {
            continue;
        };

        let mut endpoints = Vec::new();
        for row in table.select(&row_selector) {
            let cells: Vec<String> = row.select(&cell_selector).map(|td| cell_text(&td)).collect();
            let (Some(host), Some(port)) = (cells.get(host_idx), cells.get(port_idx)) else {
                continue;
            };
            if host.is_empty() {
                continue;
            }
            match port.parse::<u16>() {
                Ok(port) => endpoints.push(ProxyEndpoint::new(host.clone(), port)),
                Err(_) => tracing::debug!("Skipping proxy row with port '{}'", port),
            }
        }

        return Ok(endpoints);
    }

    Err(FetchError::ProxySourceUnavailable(format!(
        "no table with '{}' and '{}' columns",
        HOST_HEADER, PORT_HEADER
    )))
}

fn cell_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn selector(css: &str) -> FetchResult<Selector> {
    Selector::parse(css)
        .map_err(|e| FetchError::ProxySourceUnavailable(format!("selector {}: {:?}", css, e)))
}
