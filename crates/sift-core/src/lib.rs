//! Sift Core - Foundation crate for the Sift scraping orchestrator.
//!
//! This crate provides the task model, record and event types, error handling,
//! and configuration management that all other Sift crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes (`TaskId`, `Target`, `Timestamp`)
//! - [`task`] - Task lifecycle state machine and per-task bookkeeping
//! - [`record`] - Extracted record payload
//! - [`event`] - Progress events and the `EventSink` seam
//! - [`handle`] - Shared task handle that emits a status event per transition
//!
//! # Example
//!
//! ```rust
//! use sift_core::{AppConfig, Target, Task, TaskOptions, TaskState};
//!
//! let config = AppConfig::default();
//! assert_eq!(config.scheduler.max_concurrency, 1);
//!
//! let task = Task::new(1, Target::parse("vintage camera"), TaskOptions::default());
//! assert_eq!(task.state(), TaskState::Queued);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod event;
pub mod handle;
pub mod record;
#[allow(missing_docs)]
pub mod task;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, DetectionConfig, EnrichmentConfig, ExportConfig, ExtractorConfig,
    SchedulerConfig, ServerConfig, SessionConfig, SiteConfig,
};
pub use error::{ConfigError, ConfigResult, Result, SiftError};
pub use event::{EventPayload, EventSink, MemorySink, NullSink, ProgressEvent};
pub use handle::TaskHandle;
pub use record::Record;
pub use task::{ConcurrencyClass, Task, TaskOptions, TaskSnapshot, TaskState};
pub use types::{Target, TaskId, Timestamp};
