//! Task lifecycle state machine and per-task bookkeeping.
//!
//! A [`Task`] is mutated only by the scheduler and the session controller
//! running it. Once it reaches a terminal state its state and record list are
//! frozen; every mutator returns [`SiftError::TaskFinalized`] afterwards.

use crate::error::{Result, SiftError};
use crate::record::Record;
use crate::types::{Target, TaskId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the scheduler queue
    Queued,
    /// Admitted; acquiring an execution environment
    Initializing,
    /// Iterating pages
    Running,
    /// Suspended by a pause command
    Paused,
    /// Waiting out a backoff window after a detection signal
    AwaitingBackoff,
    /// Finished normally
    Completed,
    /// Finished because of an unrecoverable error
    Failed,
    /// Finished because of a stop command or persistent detection
    Stopped,
}

impl TaskState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::{
            AwaitingBackoff, Completed, Failed, Initializing, Paused, Queued, Running, Stopped,
        };

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            // Explicit stop or fatal error from any live state
            (_, Stopped | Failed) => true,
            (Queued, Initializing)
            | (Initializing, Running)
            | (Running, Paused | AwaitingBackoff | Completed)
            | (Paused | AwaitingBackoff, Running) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::AwaitingBackoff => "awaiting_backoff",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How a task shares the execution capacity with others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyClass {
    /// Counts against `max_concurrency` alongside other shared tasks
    #[default]
    Shared,
    /// Runs only when no other session is active
    Exclusive,
}

/// Per-task options supplied with `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskOptions {
    /// Results per page requested from the target
    pub page_size: u32,
    /// Upper bound on pages to visit
    pub max_pages: Option<u32>,
    /// Drop records whose key was already collected by this task
    pub dedupe: bool,
    /// Secondary fields to fill from detail pages (empty = no enrichment)
    pub enrich: Vec<String>,
    /// Admission class
    pub concurrency_class: ConcurrencyClass,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            page_size: 60,
            max_pages: None,
            dedupe: true,
            enrich: Vec::new(),
            concurrency_class: ConcurrencyClass::Shared,
        }
    }
}

/// One independently tracked scrape request.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    seq: u64,
    target: Target,
    label: String,
    options: TaskOptions,
    state: TaskState,
    records: Vec<Record>,
    seen: HashSet<String>,
    page: u32,
    total_pages: Option<u32>,
    detection_retries: u32,
    navigation_retries: u32,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
    message: Option<String>,
}

impl Task {
    /// Create a queued task. `seq` orders tasks by submission.
    #[must_use]
    pub fn new(seq: u64, target: Target, options: TaskOptions) -> Self {
        let label = target.label();
        Self {
            id: TaskId::generate(),
            seq,
            target,
            label,
            options,
            state: TaskState::Queued,
            records: Vec::new(),
            seen: HashSet::new(),
            page: 0,
            total_pages: None,
            detection_retries: 0,
            navigation_retries: 0,
            created_at: Timestamp::now(),
            started_at: None,
            finished_at: None,
            message: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    #[must_use]
    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages
    }

    #[must_use]
    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Move to `next`, stamping start and finish times.
    ///
    /// # Errors
    /// Returns [`SiftError::InvalidTransition`] if the edge does not exist.
    pub fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SiftError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        if next == TaskState::Initializing {
            self.started_at = Some(Timestamp::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Timestamp::now());
        }
        self.state = next;
        Ok(())
    }

    /// Append page candidates, applying dedupe when requested.
    ///
    /// Each accepted record is stamped with `captured_at`. Returns the number
    /// of records actually appended.
    pub fn append_records(&mut self, candidates: Vec<Record>, captured_at: Timestamp) -> Result<usize> {
        self.ensure_live()?;

        let mut added = 0;
        for mut record in candidates {
            if self.options.dedupe && !self.seen.insert(record.id.clone()) {
                continue;
            }
            record.captured_at = Some(captured_at);
            self.records.push(record);
            added += 1;
        }
        Ok(added)
    }

    /// Apply `update` to the record at `index` (enrichment pass).
    pub fn update_record<F>(&mut self, index: usize, update: F) -> Result<()>
    where
        F: FnOnce(&mut Record),
    {
        self.ensure_live()?;
        let record = self.records.get_mut(index).ok_or_else(|| {
            SiftError::Validation(format!("record index {index} out of range"))
        })?;
        update(record);
        Ok(())
    }

    /// Record the page cursor.
    pub fn set_page(&mut self, page: u32) -> Result<()> {
        self.ensure_live()?;
        self.page = page;
        Ok(())
    }

    /// Record the computed total-page estimate.
    pub fn set_total_pages(&mut self, total: u32) -> Result<()> {
        self.ensure_live()?;
        self.total_pages = Some(total);
        Ok(())
    }

    /// Count one backoff retry after a detection signal.
    pub fn count_detection_retry(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.detection_retries += 1;
        Ok(())
    }

    /// Count one navigation retry.
    pub fn count_navigation_retry(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.navigation_retries += 1;
        Ok(())
    }

    /// Attach a human-readable note (terminal reason, export failure).
    pub fn annotate(&mut self, message: impl Into<String>) -> Result<()> {
        self.ensure_live()?;
        self.message = Some(message.into());
        Ok(())
    }

    /// Milliseconds between start (or creation) and finish (or now).
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.finished_at.unwrap_or_else(Timestamp::now);
        end.millis_since(&start)
    }

    /// Point-in-time view for reconnecting clients and the snapshot file.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            target: self.target.clone(),
            label: self.label.clone(),
            options: self.options.clone(),
            state: self.state,
            page: self.page,
            total_pages: self.total_pages,
            total_records: self.records.len(),
            detection_retries: self.detection_retries,
            navigation_retries: self.navigation_retries,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            message: self.message.clone(),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state.is_terminal() {
            Err(SiftError::TaskFinalized(self.id.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Serializable view of a task's current state and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub target: Target,
    pub label: String,
    pub options: TaskOptions,
    pub state: TaskState,
    pub page: u32,
    pub total_pages: Option<u32>,
    pub total_records: usize,
    pub detection_retries: u32,
    pub navigation_retries: u32,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub message: Option<String>,
}
