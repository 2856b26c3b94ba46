//! Sift Scheduler - task registry, admission and control.
//!
//! The [`Scheduler`] accepts targets, queues them in FIFO order, admits them
//! up to a concurrency bound and hands each admitted task to a
//! [`sift_scanner::SessionController`]. It also routes stop, pause and resume
//! requests and serves registry snapshots to reconnecting clients.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod error;
pub mod scheduler;
#[allow(missing_docs)]
pub mod snapshot;

pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
pub use snapshot::{read_snapshot, spawn_snapshot_writer, write_snapshot, SnapshotFile};
