//! Shared, event-emitting access to a [`Task`].
//!
//! The scheduler and the session controller both hold a [`TaskHandle`] for the
//! same task. Every state change goes through [`TaskHandle::transition`], which
//! emits the matching `status` event while the task lock is held, so events for
//! one task reach the sink in the order the changes were made.

use crate::error::{Result, SiftError};
use crate::event::{EventPayload, EventSink, ProgressEvent};
use crate::task::{Task, TaskSnapshot, TaskState};
use crate::types::TaskId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cloneable handle to one task plus the sink its events go to.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    task: Arc<Mutex<Task>>,
    events: Arc<dyn EventSink>,
}

impl TaskHandle {
    /// Wrap `task`, routing its events to `events`.
    pub fn new(task: Task, events: Arc<dyn EventSink>) -> Self {
        Self {
            id: task.id().clone(),
            task: Arc::new(Mutex::new(task)),
            events,
        }
    }

    /// Id of the wrapped task.
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, Task> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the task without mutating it.
    pub fn read<R>(&self, f: impl FnOnce(&Task) -> R) -> R {
        f(&self.lock())
    }

    /// Run a fallible mutation against the task.
    pub fn update<R>(&self, f: impl FnOnce(&mut Task) -> Result<R>) -> Result<R> {
        f(&mut self.lock())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.lock().state()
    }

    /// Point-in-time view of the task.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        self.lock().snapshot()
    }

    /// Move the task to `next` and emit exactly one `status` event.
    ///
    /// A `message` is stored on the task as its annotation before the move.
    pub fn transition(&self, next: TaskState, message: Option<String>) -> Result<()> {
        let mut task = self.lock();
        let from = task.state();
        if !from.can_transition_to(next) {
            return Err(SiftError::InvalidTransition { from, to: next });
        }
        if let Some(message) = &message {
            task.annotate(message.clone())?;
        }
        task.transition(next)?;

        tracing::debug!(task_id = %self.id, from = %from, to = %next, "Task state changed");
        self.events.emit(ProgressEvent::new(
            self.id.clone(),
            EventPayload::Status {
                state: next,
                message,
            },
        ));
        Ok(())
    }

    /// Emit a non-status event for this task.
    pub fn emit(&self, payload: EventPayload) {
        let _task = self.lock();
        self.events.emit(ProgressEvent::new(self.id.clone(), payload));
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish_non_exhaustive()
    }
}
