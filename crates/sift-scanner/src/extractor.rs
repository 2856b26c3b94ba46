use sift_browser::LoadedPage;
use sift_core::Record;
use std::collections::BTreeMap;
use thiserror::Error;

/// A page could not be turned into records.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ExtractionError(pub String);

impl ExtractionError {
    /// Wrap a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Turns loaded pages into records.
///
/// Implementations are pure functions of the page content; the session
/// controller owns navigation, pacing and bookkeeping.
pub trait Extractor: Send + Sync {
    /// Candidate records on a listing page, in page order.
    fn extract(&self, page: &LoadedPage) -> Result<Vec<Record>, ExtractionError>;

    /// Total result count advertised by the first listing page, if any.
    fn total_results(&self, _page: &LoadedPage) -> Option<u64> {
        None
    }

    /// Whether the page explicitly marks the end of the result set.
    fn is_last_page(&self, _page: &LoadedPage) -> bool {
        false
    }

    /// Values for the requested secondary `fields` found on a detail page.
    fn extract_details(
        &self,
        _page: &LoadedPage,
        fields: &[String],
    ) -> Result<BTreeMap<String, String>, ExtractionError> {
        Err(ExtractionError::new(format!(
            "detail extraction not supported for {fields:?}"
        )))
    }
}
