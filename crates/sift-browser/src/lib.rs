//! Execution environments for JavaScript-heavy target sites.
//!
//! Provides the [`Environment`] seam the session controller drives, plus a
//! headless Chromium implementation built on chromiumoxide.

pub mod engine;
pub mod environment;
pub mod error;

pub use engine::{BrowserEngine, BrowserLauncher};
pub use environment::{extract_domain, Environment, EnvironmentLauncher, LoadedPage};
pub use error::{BrowserError, Result};
