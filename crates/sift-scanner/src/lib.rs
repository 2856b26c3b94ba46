//! Sift Scanner - per-task scraping sessions.
//!
//! This crate drives a single task through its listing pages inside one
//! browser environment. It owns pacing, navigation retries, block-page
//! detection with linear backoff, dedupe, the optional detail enrichment
//! pass and the final export.
//!
//! # Features
//!
//! - Retry environment acquisition with a fixed delay
//! - Randomized delay between pages and between detail visits
//! - Detection markers on URL, title and body with capped linear backoff
//! - Early stop after a run of empty pages
//! - Cooperative pause and stop through [`TaskControl`]
//!
//! # Example
//!
//! ```rust,ignore
//! use sift_scanner::{SessionController, SessionDeps, SessionSettings, TaskControl};
//! use std::sync::Arc;
//!
//! let deps = SessionDeps { launcher, extractor, persistence };
//! let controller = SessionController::new(
//!     task_handle,
//!     TaskControl::new(),
//!     deps,
//!     Arc::new(SessionSettings::default()),
//! );
//! let final_state = controller.run().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod control;
#[allow(missing_docs)]
pub mod detection;
#[allow(missing_docs)]
pub mod error;
pub mod extractor;
pub mod selector;
#[allow(missing_docs)]
pub mod session;
#[allow(missing_docs)]
pub mod url_builder;

// Re-export commonly used types
pub use control::{jittered, TaskControl};
pub use detection::{BackoffDecision, BackoffPolicy, BackoffState, DetectionMonitor, Verdict};
pub use error::{Result, ScanError};
pub use extractor::{ExtractionError, Extractor};
pub use selector::SelectorExtractor;
pub use session::{compute_total_pages, SessionController, SessionDeps, SessionSettings};
pub use url_builder::build_page_url;
