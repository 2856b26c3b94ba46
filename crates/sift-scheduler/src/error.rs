use sift_core::{SiftError, TaskId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task {0} has already finished")]
    AlreadyFinished(TaskId),

    #[error("task {0} is still active")]
    StillActive(TaskId),

    #[error("task error: {0}")]
    Task(#[from] SiftError),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
