/// Page state definitions for tracking harvest progress
///
/// The coordinator walks every index page through the same phases and
/// refuses any transition not listed in [`PageState::can_transition_to`].
use crate::HarvestError;
use std::fmt;

/// The phase the coordinator is in for the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    /// No page has been requested yet
    Starting,

    /// The index page is being downloaded
    FetchingPage,

    /// The index page is being turned into listings
    ParsingPage,

    /// Detail pages are being fetched and merged into the listings
    EnrichingRows,

    /// The page's rows are being written out
    Persisting,

    /// The page is done and its outcome recorded
    NextPage,

    // ===== Terminal State =====
    /// The walk is over
    Terminated,
}

impl PageState {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns true if the state sits inside one page's processing
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::FetchingPage | Self::ParsingPage | Self::EnrichingRows | Self::Persisting
        )
    }

    /// Checks whether moving from `self` to `next` is allowed
    ///
    /// A failed fetch or parse goes back to `FetchingPage` for another
    /// attempt, or straight to `NextPage` once attempts are used up. A page
    /// without listings skips enrichment and persistence.
    pub fn can_transition_to(&self, next: PageState) -> bool {
        use PageState::*;

        matches!(
            (self, next),
            (Starting, FetchingPage)
                | (Starting, Terminated)
                | (FetchingPage, FetchingPage)
                | (FetchingPage, ParsingPage)
                | (FetchingPage, NextPage)
                | (ParsingPage, FetchingPage)
                | (ParsingPage, EnrichingRows)
                | (ParsingPage, NextPage)
                | (EnrichingRows, Persisting)
                | (Persisting, NextPage)
                | (NextPage, FetchingPage)
                | (NextPage, Terminated)
        )
    }

    /// Moves to `next`, rejecting transitions the walk never makes
    ///
    /// # Returns
    ///
    /// * `Ok(PageState)` - The new state
    /// * `Err(HarvestError::InvalidTransition)` - The move is not allowed
    pub fn transition(self, next: PageState) -> Result<PageState, HarvestError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(HarvestError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::FetchingPage => "fetching_page",
            Self::ParsingPage => "parsing_page",
            Self::EnrichingRows => "enriching_rows",
            Self::Persisting => "persisting",
            Self::NextPage => "next_page",
            Self::Terminated => "terminated",
        }
    }

    /// Returns all possible page states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Starting,
            Self::FetchingPage,
            Self::ParsingPage,
            Self::EnrichingRows,
            Self::Persisting,
            Self::NextPage,
            Self::Terminated,
        ]
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
