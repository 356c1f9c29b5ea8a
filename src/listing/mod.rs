//! Listing data model
//!
//! Rows flow through three shapes:
//! - `RawListing`: one unit row as read from an index page, plus its building
//! - `ListingDetail`: the supplementary attributes from the unit's detail page
//! - `EnrichedRow`: the two merged into one flat record ready to persist
//!
//! A `PageResult` groups the enriched rows of one index page in source order.

mod record;

pub use record::Record;

use std::collections::HashSet;

/// Column holding the 1-based page number
pub const PAGE_COLUMN: &str = "page";

/// Column holding the JSON-encoded amenity list
pub const OPTIONS_COLUMN: &str = "options";

/// Column holding the resolved detail page URL
pub const URL_COLUMN: &str = "url";

/// One unit row of an index page together with its building fields
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    /// Index page the row was found on
    pub page: u32,

    /// Building-level fields shared by every unit of the article
    pub building: Record,

    /// Unit-level fields, paired header to cell
    pub unit: Record,

    /// Absolute URL of the unit's detail page
    pub detail_url: Option<String>,
}

/// Supplementary attributes parsed from a detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetail {
    /// Amenity options in page order
    pub options: Vec<String>,

    /// Key/value attribute table, later duplicates win
    pub attributes: Record,
}

/// A listing merged with its detail attributes
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    pub page: u32,

    /// Flattened columns: page, building, unit, options, attributes, url
    pub fields: Record,

    /// True when the detail page could not be merged in
    pub degraded: bool,
}

impl EnrichedRow {
    /// Merges a listing with its detail page
    ///
    /// Listing keys win over identically named detail keys. `page` and `url`
    /// are always set from the listing itself. Fields named in `ignore` are
    /// dropped.
    pub fn merge(
        listing: &RawListing,
        detail: Option<&ListingDetail>,
        ignore: &HashSet<String>,
    ) -> Self {
        let mut fields = Record::new();
        fields.insert(PAGE_COLUMN, listing.page.to_string());

        for (key, value) in listing.building.iter().chain(listing.unit.iter()) {
            if !ignore.contains(key) {
                fields.insert_if_absent(key, value);
            }
        }

        if let Some(detail) = detail {
            let options = serde_json::Value::from(detail.options.clone()).to_string();
            fields.insert_if_absent(OPTIONS_COLUMN, options);

            for (key, value) in detail.attributes.iter() {
                if ignore.contains(key) {
                    continue;
                }
                if !fields.insert_if_absent(key, value) {
                    tracing::debug!("Detail attribute '{}' shadowed by listing field", key);
                }
            }
        }

        if let Some(url) = &listing.detail_url {
            fields.insert(URL_COLUMN, url.clone());
        }

        Self {
            page: listing.page,
            fields,
            degraded: detail.is_none(),
        }
    }

    /// Returns a field value by column name
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column)
    }
}

/// The rows harvested from one index page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub page: u32,
    pub rows: Vec<EnrichedRow>,
}

impl PageResult {
    pub fn new(page: u32, rows: Vec<EnrichedRow>) -> Self {
        Self { page, rows }
    }

    /// An empty page signals that the listing has run out
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows missing their detail attributes
    pub fn degraded_count(&self) -> usize {
        self.rows.iter().filter(|row| row.degraded).count()
    }

    /// Union of all row columns in first-seen order
    pub fn columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in &self.rows {
            for key in row.fields.keys() {
                if seen.insert(key) {
                    columns.push(key.to_string());
                }
            }
        }
        columns
    }
}
