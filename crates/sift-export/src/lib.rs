//! Sift Export - durable writer for finalized task records.
//!
//! The session controller hands every task's accumulated records to a
//! [`Persistence`] implementation exactly once, at finalization. The bundled
//! [`CsvExporter`] writes one CSV artifact per task.

#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]

pub mod csv_writer;
pub mod error;
pub mod filename;

pub use csv_writer::CsvExporter;
pub use error::{ExportError, Result};
pub use filename::export_file_name;

use sift_core::Record;
use std::path::PathBuf;

/// Durable writer for a finalized record set.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Write `records` for the task labelled `label`; returns the written paths.
    ///
    /// `fields` are the secondary fields the task requested. They are part of
    /// the artifact's layout whether or not any record carries them.
    async fn persist(&self, label: &str, fields: &[String], records: &[Record])
        -> Result<Vec<PathBuf>>;
}
