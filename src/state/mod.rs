//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `PageState`: The phase the coordinator is in for the current page

mod page_state;

pub use page_state::PageState;
