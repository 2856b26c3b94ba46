//! Task registry and FIFO admission.
//!
//! The scheduler owns every task it has accepted. Queued tasks are admitted in
//! submission order while fewer than `max_concurrency` sessions are active.
//! An `Exclusive` task at the head of the queue waits until nothing else runs,
//! and nothing else is admitted while it runs.

use crate::error::{Result, SchedulerError};
use sift_core::{
    ConcurrencyClass, EventPayload, EventSink, Target, Task, TaskHandle, TaskId, TaskOptions,
    TaskSnapshot, TaskState,
};
use sift_scanner::{SessionController, SessionDeps, SessionSettings, TaskControl};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct TaskEntry {
    seq: u64,
    handle: TaskHandle,
    control: TaskControl,
    class: ConcurrencyClass,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<TaskId>,
    tasks: HashMap<TaskId, TaskEntry>,
    active: usize,
    exclusive_running: bool,
    next_seq: u64,
}

impl SchedulerState {
    fn entry(&self, id: &TaskId) -> Result<&TaskEntry> {
        self.tasks
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownTask(id.clone()))
    }

    /// Stop one task with the lock held.
    fn stop(&mut self, id: &TaskId) -> Result<()> {
        let entry = self.entry(id)?;
        match entry.handle.state() {
            state if state.is_terminal() => Err(SchedulerError::AlreadyFinished(id.clone())),
            TaskState::Queued => {
                entry
                    .handle
                    .transition(TaskState::Stopped, Some("stopped before start".to_string()))?;
                self.queue.retain(|queued| queued != id);
                Ok(())
            }
            _ => {
                entry.control.cancel();
                Ok(())
            }
        }
    }
}

struct Inner {
    state: Mutex<SchedulerState>,
    deps: SessionDeps,
    settings: Arc<SessionSettings>,
    events: Arc<dyn EventSink>,
    max_concurrency: usize,
    idle: Notify,
}

/// Cloneable handle to the task registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler. `max_concurrency` below 1 is treated as 1.
    pub fn new(
        deps: SessionDeps,
        settings: SessionSettings,
        events: Arc<dyn EventSink>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::default()),
                deps,
                settings: Arc::new(settings),
                events,
                max_concurrency: max_concurrency.max(1),
                idle: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task, announce it and try to admit it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, target: Target, options: TaskOptions) -> TaskId {
        let id = {
            let mut state = self.lock();
            state.next_seq += 1;
            let seq = state.next_seq;

            let class = options.concurrency_class;
            let task = Task::new(seq, target, options);
            let id = task.id().clone();
            let handle = TaskHandle::new(task, self.inner.events.clone());

            let (raw, label) = handle.read(|t| (t.target().as_str().to_string(), t.label().to_string()));
            handle.emit(EventPayload::TaskCreated { target: raw, label });
            handle.emit(EventPayload::Status {
                state: TaskState::Queued,
                message: None,
            });

            tracing::info!(task_id = %id, seq, "Task queued");
            state.queue.push_back(id.clone());
            state.tasks.insert(
                id.clone(),
                TaskEntry {
                    seq,
                    handle,
                    control: TaskControl::new(),
                    class,
                },
            );
            id
        };

        self.admit();
        id
    }

    /// Submit several targets with shared options, preserving their order.
    pub fn submit_all(&self, targets: Vec<Target>, options: &TaskOptions) -> Vec<TaskId> {
        targets
            .into_iter()
            .map(|target| self.submit(target, options.clone()))
            .collect()
    }

    /// Start queued tasks while capacity allows.
    fn admit(&self) {
        let mut state = self.lock();

        while state.active < self.inner.max_concurrency && !state.exclusive_running {
            let Some(id) = state.queue.front().cloned() else {
                break;
            };
            let Some(entry) = state.tasks.get(&id) else {
                state.queue.pop_front();
                continue;
            };

            let exclusive = entry.class == ConcurrencyClass::Exclusive;
            if exclusive && state.active > 0 {
                break;
            }

            let handle = entry.handle.clone();
            let control = entry.control.clone();
            state.queue.pop_front();

            if let Err(e) = handle.transition(TaskState::Initializing, None) {
                tracing::warn!(task_id = %id, "Skipping task at admission: {}", e);
                continue;
            }

            state.active += 1;
            if exclusive {
                state.exclusive_running = true;
            }
            tracing::info!(task_id = %id, active = state.active, "Task admitted");
            self.spawn_session(handle, control, exclusive);
        }
    }

    fn spawn_session(&self, handle: TaskHandle, control: TaskControl, exclusive: bool) {
        let scheduler = self.clone();
        let controller = SessionController::new(
            handle.clone(),
            control,
            self.inner.deps.clone(),
            self.inner.settings.clone(),
        );

        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(controller.run()).await {
                tracing::error!(task_id = %handle.id(), "Session aborted: {}", e);
                if !handle.state().is_terminal() {
                    let _ = handle.transition(TaskState::Failed, Some(format!("session aborted: {e}")));
                }
            }
            scheduler.release(exclusive);
        });
    }

    /// Free a slot after a session ends and admit the next task.
    fn release(&self, exclusive: bool) {
        {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
            if exclusive {
                state.exclusive_running = false;
            }
        }
        self.admit();
        self.inner.idle.notify_waiters();
    }

    /// Stop a task: queued tasks stop at once, running ones are cancelled.
    pub fn stop(&self, id: &TaskId) -> Result<()> {
        let result = self.lock().stop(id);
        if result.is_ok() {
            tracing::info!(task_id = %id, "Stop requested");
            self.inner.idle.notify_waiters();
        }
        result
    }

    /// Stop every live task. Returns how many were signalled.
    pub fn stop_all(&self) -> usize {
        let mut state = self.lock();
        let mut ids: Vec<(u64, TaskId)> = state
            .tasks
            .iter()
            .filter(|(_, entry)| !entry.handle.state().is_terminal())
            .map(|(id, entry)| (entry.seq, id.clone()))
            .collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);

        // Queued tasks first so a finishing session cannot admit one of them.
        let (queued, running): (Vec<_>, Vec<_>) = ids
            .into_iter()
            .partition(|(_, id)| state.tasks[id].handle.state() == TaskState::Queued);

        let stopped = queued
            .iter()
            .chain(running.iter())
            .filter(|(_, id)| state.stop(id).is_ok())
            .count();
        drop(state);
        tracing::info!(stopped, "Stop requested for all tasks");
        self.inner.idle.notify_waiters();
        stopped
    }

    /// Ask a live task to pause at its next page boundary.
    pub fn pause(&self, id: &TaskId) -> Result<()> {
        let state = self.lock();
        let entry = state.entry(id)?;
        if entry.handle.state().is_terminal() {
            return Err(SchedulerError::AlreadyFinished(id.clone()));
        }
        entry.control.pause();
        tracing::info!(task_id = %id, "Pause requested");
        Ok(())
    }

    /// Let a paused task continue.
    pub fn resume(&self, id: &TaskId) -> Result<()> {
        let state = self.lock();
        let entry = state.entry(id)?;
        if entry.handle.state().is_terminal() {
            return Err(SchedulerError::AlreadyFinished(id.clone()));
        }
        entry.control.resume();
        tracing::info!(task_id = %id, "Resume requested");
        Ok(())
    }

    /// Every known task, in submission order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let state = self.lock();
        let mut entries: Vec<&TaskEntry> = state.tasks.values().collect();
        entries.sort_unstable_by_key(|entry| entry.seq);
        entries.iter().map(|entry| entry.handle.snapshot()).collect()
    }

    /// One task's snapshot.
    pub fn get(&self, id: &TaskId) -> Result<TaskSnapshot> {
        Ok(self.lock().entry(id)?.handle.snapshot())
    }

    /// Remove one finished task from the registry.
    pub fn purge(&self, id: &TaskId) -> Result<()> {
        let mut state = self.lock();
        if !state.entry(id)?.handle.state().is_terminal() {
            return Err(SchedulerError::StillActive(id.clone()));
        }
        state.tasks.remove(id);
        tracing::debug!(task_id = %id, "Task purged");
        Ok(())
    }

    /// Remove every finished task. Returns how many were removed.
    pub fn purge_finished(&self) -> usize {
        let mut state = self.lock();
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, entry| !entry.handle.state().is_terminal());
        let purged = before - state.tasks.len();
        tracing::debug!(purged, "Purged finished tasks");
        purged
    }

    /// Number of sessions holding a slot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    /// Number of tasks waiting for a slot.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.lock().queue.len()
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.active == 0 && state.queue.is_empty()
    }

    /// Wait until no task is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Scheduler")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .field("tasks", &state.tasks.len())
            .finish()
    }
}
