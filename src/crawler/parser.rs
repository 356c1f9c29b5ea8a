//! Index page parser
//!
//! An index page lists buildings ("articles"). Every article carries a few
//! building-level fields and a table with one body per rentable unit. Each
//! unit row becomes one `RawListing` holding the building fields, the unit
//! cells paired with the table headers, and the resolved detail link.

use crate::config::Config;
use crate::listing::{RawListing, Record};
use crate::text::pretty_text;
use crate::url::resolve_link;
use crate::{ParseError, ParseResult};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Compiles a CSS selector, mapping failures into `ParseError`
pub(crate) fn compile_selector(css: &str) -> ParseResult<Selector> {
    Selector::parse(css).map_err(|e| ParseError::InvalidSelector {
        selector: css.to_string(),
        message: format!("{:?}", e),
    })
}

/// Concatenated, normalized text content of an element
pub(crate) fn element_text(element: &ElementRef) -> String {
    pretty_text(&element.text().collect::<String>())
}

/// Schema-driven parser for index pages
///
/// All selectors are compiled once, when the parser is built from the
/// configuration.
#[derive(Debug)]
pub struct PageParser {
    article: Selector,
    unit_table: Selector,
    unit_row: Selector,
    header_cell: Selector,
    data_cell: Selector,
    detail_link: Selector,
    building_fields: Vec<(String, Selector)>,
    origin: Url,
    ignore: HashSet<String>,
    strict_columns: bool,
}

impl PageParser {
    /// Builds a parser from the selector, building field and output sections
    ///
    /// # Returns
    ///
    /// * `Ok(PageParser)` - Every selector compiled
    /// * `Err(HarvestError)` - A selector or the site origin is invalid
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let selectors = &config.selectors;

        let building_fields = config
            .building_fields
            .iter()
            .map(|field| Ok((field.name.clone(), compile_selector(&field.css())?)))
            .collect::<ParseResult<Vec<_>>>()?;

        Ok(Self {
            article: compile_selector(&selectors.article)?,
            unit_table: compile_selector(&selectors.unit_table)?,
            unit_row: compile_selector(&selectors.unit_row)?,
            header_cell: compile_selector(&selectors.header_cell)?,
            data_cell: compile_selector(&selectors.data_cell)?,
            detail_link: compile_selector(&selectors.detail_link)?,
            building_fields,
            origin: Url::parse(&config.site.origin)?,
            ignore: config.output.ignore_fields.iter().cloned().collect(),
            strict_columns: config.crawl.strict_columns,
        })
    }

    /// Extracts every unit row of an index page, in document order
    ///
    /// A page with K articles of M unit rows each yields K×M listings. Fields
    /// that are ignored, or whose header or value is empty, are left out of
    /// the listing.
    ///
    /// # Arguments
    ///
    /// * `html` - The index page document
    /// * `page` - The page number stamped on every listing
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<RawListing>)` - The listings; empty when the page has no articles
    /// * `Err(ParseError::PageParse)` - A unit table has rows but no headers
    /// * `Err(ParseError::ColumnMismatch)` - Header and cell counts differ in
    ///   strict mode
    pub fn parse_page(&self, html: &str, page: u32) -> ParseResult<Vec<RawListing>> {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();

        for (index, article) in document.select(&self.article).enumerate() {
            let building = self.building_record(&article);

            let Some(table) = article.select(&self.unit_table).next() else {
                tracing::debug!("Page {}, article {} has no unit table", page, index);
                continue;
            };

            let headers: Vec<String> = table
                .select(&self.header_cell)
                .map(|th| element_text(&th))
                .collect();

            for row in table.select(&self.unit_row) {
                let cells: Vec<String> = row
                    .select(&self.data_cell)
                    .map(|td| element_text(&td))
                    .collect();
                if cells.is_empty() {
                    continue;
                }

                if headers.is_empty() {
                    return Err(ParseError::PageParse {
                        page,
                        message: format!("article {} has unit rows but no headers", index),
                    });
                }

                if headers.len() != cells.len() {
                    if self.strict_columns {
                        return Err(ParseError::ColumnMismatch {
                            page,
                            article: index,
                            headers: headers.len(),
                            cells: cells.len(),
                        });
                    }
                    tracing::warn!(
                        "Page {}, article {}: {} headers but {} cells; extra columns dropped",
                        page,
                        index,
                        headers.len(),
                        cells.len()
                    );
                }

                let mut unit = Record::new();
                for (header, cell) in headers.iter().zip(cells) {
                    if self.keeps(header, &cell) {
                        unit.insert(header.as_str(), cell);
                    }
                }

                let detail_url = row
                    .select(&self.detail_link)
                    .next()
                    .and_then(|link| link.value().attr("href"))
                    .and_then(|href| resolve_link(&self.origin, href))
                    .map(|url| url.to_string());

                listings.push(RawListing {
                    page,
                    building: building.clone(),
                    unit,
                    detail_url,
                });
            }
        }

        tracing::debug!("Page {}: {} unit rows", page, listings.len());
        Ok(listings)
    }

    fn building_record(&self, article: &ElementRef) -> Record {
        let mut building = Record::new();
        for (name, selector) in &self.building_fields {
            let value = article
                .select(selector)
                .next()
                .map(|element| element_text(&element))
                .unwrap_or_default();
            if self.keeps(name, &value) {
                building.insert(name.as_str(), value);
            }
        }
        building
    }

    fn keeps(&self, name: &str, value: &str) -> bool {
        !name.is_empty() && !value.is_empty() && !self.ignore.contains(name)
    }
}
