use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("browser crashed: {0}")]
    Crashed(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("environment already closed")]
    Closed,
}

impl BrowserError {
    /// Whether the environment itself is gone, as opposed to one page load failing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChromiumError(_) | Self::Crashed(_) | Self::Closed)
    }
}
