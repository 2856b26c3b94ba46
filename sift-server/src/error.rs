//! Error replies for channel commands.

use serde::Serialize;
use sift_channel::ControlMessage;
use sift_scheduler::SchedulerError;

/// Serializable rejection of an inbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandError {
    /// Error code for client handling (e.g., "UNKNOWN_TASK")
    pub code: String,
    /// User-friendly error message
    pub message: String,
}

impl CommandError {
    /// Create a new command error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<SchedulerError> for CommandError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::UnknownTask(id) => {
                Self::new("UNKNOWN_TASK", format!("No task with id {id}"))
            }
            SchedulerError::AlreadyFinished(id) => {
                Self::new("ALREADY_FINISHED", format!("Task {id} has already finished"))
            }
            SchedulerError::StillActive(id) => {
                Self::new("STILL_ACTIVE", format!("Task {id} is still active"))
            }
            SchedulerError::Task(err) => Self::new("TASK_ERROR", format!("Task error: {err}")),
            SchedulerError::Io(err) => Self::new("IO_ERROR", format!("I/O error: {err}")),
            SchedulerError::Serialization(err) => {
                Self::new("SERIALIZATION_ERROR", format!("Serialization error: {err}"))
            }
        }
    }
}

impl From<CommandError> for ControlMessage {
    fn from(err: CommandError) -> Self {
        ControlMessage::rejected(err.code, err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::TaskId;

    #[test]
    fn test_scheduler_errors_map_to_codes() {
        let id = TaskId::generate();
        let err = CommandError::from(SchedulerError::UnknownTask(id.clone()));
        assert_eq!(err.code, "UNKNOWN_TASK");
        assert!(err.message.contains(id.as_str()));

        let err = CommandError::from(SchedulerError::AlreadyFinished(id));
        assert_eq!(err.code, "ALREADY_FINISHED");
    }

    #[test]
    fn test_into_rejected() {
        let message = ControlMessage::from(CommandError::new("NO_TARGETS", "nothing to do"));
        assert_eq!(message, ControlMessage::rejected("NO_TARGETS", "nothing to do"));
    }
}
