//! Detail page parser
//!
//! A unit's detail page adds two things to its listing: the amenity list
//! ("options") and a key/value overview table.

use crate::config::SelectorConfig;
use crate::crawler::parser::{compile_selector, element_text};
use crate::listing::{ListingDetail, Record};
use crate::text::split_options;
use crate::{ParseError, ParseResult};
use scraper::{Html, Selector};

pub struct DetailParser {
    options: Selector,
    attributes_table: Selector,
    row: Selector,
    key_cell: Selector,
    value_cell: Selector,
}

impl DetailParser {
    pub fn from_config(selectors: &SelectorConfig) -> ParseResult<Self> {
        Ok(Self {
            options: compile_selector(&selectors.options)?,
            attributes_table: compile_selector(&selectors.attributes_table)?,
            row: compile_selector("tr")?,
            key_cell: compile_selector("th")?,
            value_cell: compile_selector("td")?,
        })
    }

    /// Extracts the amenity options and the overview attributes
    ///
    /// Only the first element matched by the options selector is read; its
    /// text is split on ASCII, full-width and ideographic commas. Attribute
    /// rows may hold several `th`/`td` pairs, and a key seen twice keeps its
    /// last value.
    ///
    /// # Returns
    ///
    /// * `Ok(ListingDetail)` - Options and attributes
    /// * `Err(ParseError::OptionsBlockMissing)` - No options element
    /// * `Err(ParseError::DetailParse)` - No overview table
    pub fn parse_detail(&self, html: &str) -> ParseResult<ListingDetail> {
        let document = Html::parse_document(html);

        let options = document
            .select(&self.options)
            .next()
            .map(|element| split_options(&element.text().collect::<String>()))
            .ok_or(ParseError::OptionsBlockMissing)?;

        let table = document
            .select(&self.attributes_table)
            .next()
            .ok_or_else(|| ParseError::DetailParse("overview table not found".to_string()))?;

        let mut attributes = Record::new();
        for row in table.select(&self.row) {
            let keys = row.select(&self.key_cell).map(|th| element_text(&th));
            let values = row.select(&self.value_cell).map(|td| element_text(&td));
            for (key, value) in keys.zip(values) {
                if !key.is_empty() {
                    attributes.insert(key, value);
                }
            }
        }

        Ok(ListingDetail {
            options,
            attributes,
        })
    }
}
