use crate::error::{BrowserError, Result};
use serde::{Deserialize, Serialize};

/// Content of one loaded page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedPage {
    /// Final URL after redirects
    pub url: String,
    /// Document title
    pub title: String,
    /// Rendered HTML
    pub html: String,
}

/// An isolated rendering/navigation context.
#[async_trait::async_trait]
pub trait Environment: Send + Sync {
    /// Navigate to `url` and return the rendered page
    async fn load(&self, url: &str) -> Result<LoadedPage>;

    /// Open a sibling context that shares nothing with this one's navigation state
    async fn isolated(&self) -> Result<Box<dyn Environment>>;

    /// Release the context; errors are logged, never returned
    async fn close(&self);
}

/// Produces fresh environments for sessions.
#[async_trait::async_trait]
pub trait EnvironmentLauncher: Send + Sync {
    /// Start a new environment
    async fn launch(&self) -> Result<Box<dyn Environment>>;
}

/// Helper to extract domain from URL
pub fn extract_domain(url: &str) -> Result<String> {
    let url = url::Url::parse(url)
        .map_err(|e| BrowserError::NavigationError(format!("Invalid URL: {}", e)))?;

    url.host_str()
        .ok_or_else(|| BrowserError::NavigationError("No host in URL".to_string()))
        .map(|s| s.to_string())
}
