//! Applies inbound channel commands to the scheduler.

use crate::error::CommandError;
use sift_channel::{parse_command, Command, ControlMessage};
use sift_core::{Target, TaskOptions};
use sift_scheduler::Scheduler;

/// Parse and apply one text frame. Returns the reply to send back, if any.
///
/// `before_snapshot` runs right before a `reconnect` snapshot is taken.
pub fn handle_frame(
    scheduler: &Scheduler,
    text: &str,
    before_snapshot: impl FnOnce(),
) -> Option<ControlMessage> {
    match parse_command(text) {
        Ok(Some(command)) => dispatch(scheduler, command, before_snapshot),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Rejected inbound frame: {}", e);
            Some(ControlMessage::from(&e))
        }
    }
}

/// Apply a parsed command.
pub fn dispatch(
    scheduler: &Scheduler,
    command: Command,
    before_snapshot: impl FnOnce(),
) -> Option<ControlMessage> {
    let result = match command {
        Command::Start { targets, options } => start(scheduler, &targets, &options),
        Command::Pause { task_id } => scheduler.pause(&task_id).map_err(CommandError::from),
        Command::Resume { task_id } => scheduler.resume(&task_id).map_err(CommandError::from),
        Command::Stop { task_id } => scheduler.stop(&task_id).map_err(CommandError::from),
        Command::StopAll => {
            scheduler.stop_all();
            Ok(())
        }
        Command::Reconnect => {
            before_snapshot();
            return Some(ControlMessage::Snapshot {
                tasks: scheduler.snapshot(),
            })
        }
    };

    result.err().map(ControlMessage::from)
}

fn start(
    scheduler: &Scheduler,
    targets: &[String],
    options: &TaskOptions,
) -> Result<(), CommandError> {
    let targets: Vec<Target> = targets
        .iter()
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .map(Target::parse)
        .collect();

    if targets.is_empty() {
        return Err(CommandError::new(
            "NO_TARGETS",
            "start requires at least one non-empty target",
        ));
    }
    if options.page_size == 0 {
        return Err(CommandError::new(
            "INVALID_OPTIONS",
            "pageSize must be at least 1",
        ));
    }

    let ids = scheduler.submit_all(targets, options);
    tracing::info!(count = ids.len(), "Tasks submitted");
    Ok(())
}
