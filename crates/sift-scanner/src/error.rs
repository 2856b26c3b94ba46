use sift_browser::BrowserError;
use thiserror::Error;

/// Failure taxonomy for one scraping session.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("environment error: {0}")]
    Environment(#[source] BrowserError),

    #[error("navigation error: {0}")]
    Navigation(#[source] BrowserError),

    #[error("blocked by target site: {reason}")]
    Detection { reason: String },

    #[error("extraction error: {0}")]
    Extraction(#[from] crate::extractor::ExtractionError),

    #[error("persistence error: {0}")]
    Persistence(#[from] sift_export::ExportError),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("task error: {0}")]
    Task(#[from] sift_core::SiftError),
}

impl From<BrowserError> for ScanError {
    fn from(err: BrowserError) -> Self {
        if err.is_fatal() {
            Self::Environment(err)
        } else {
            Self::Navigation(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_errors_split_by_severity() {
        let fatal: ScanError = BrowserError::Crashed("gone".to_string()).into();
        assert!(matches!(fatal, ScanError::Environment(_)));

        let transient: ScanError = BrowserError::Timeout("slow".to_string()).into();
        assert!(matches!(transient, ScanError::Navigation(_)));
        assert!(transient.to_string().starts_with("navigation error"));
    }
}
