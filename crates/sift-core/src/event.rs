//! Progress events and the sink they are delivered through.
//!
//! Events are emitted synchronously with the state change they describe,
//! so the order a sink observes for one task is the order the changes
//! happened in.

use crate::task::TaskState;
use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// One ordered event about one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Owning task
    pub task_id: TaskId,
    /// Typed payload, serialized with a `type` tag
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ProgressEvent {
    /// Pair a payload with its task.
    #[must_use]
    pub fn new(task_id: TaskId, payload: EventPayload) -> Self {
        Self { task_id, payload }
    }
}

/// Event payloads of the outbound protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A task was registered
    TaskCreated {
        /// Raw target text
        target: String,
        /// Normalized label
        label: String,
    },
    /// The task moved to a new state
    Status {
        /// New state
        state: TaskState,
        /// Optional reason
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A page was processed
    #[serde(rename_all = "camelCase")]
    Progress {
        /// 1-based page index
        page: u32,
        /// Computed total pages
        total_pages: u32,
        /// Candidates extracted from this page
        page_records: usize,
        /// Candidates actually appended
        new_records: usize,
        /// Running total
        total_records: usize,
        /// Records per second since the task started
        throughput: f64,
    },
    /// Enrichment pass progress
    DetailProgress {
        /// Records visited so far
        current: usize,
        /// Records needing enrichment
        total: usize,
    },
    /// A detection signal started a backoff window
    #[serde(rename_all = "camelCase")]
    RateLimited {
        /// Backoff window length
        wait_seconds: u64,
        /// Consecutive detections on this task
        retry_count: u32,
    },
    /// Export artifacts were written
    FilesSaved {
        /// Written paths
        paths: Vec<String>,
    },
    /// The task finished and produced output
    #[serde(rename_all = "camelCase")]
    Complete {
        /// Final record count
        total_records: usize,
        /// Wall-clock run time
        duration_ms: u64,
        /// Primary export artifact, if one was written
        output_ref: Option<String>,
    },
    /// A task-fatal or persistence error
    #[serde(rename_all = "camelCase")]
    Error {
        /// Description
        message: String,
        /// Records collected before the error
        partial_count: usize,
    },
}

/// Destination for progress events.
///
/// Implementations must not block: `emit` is called while task state is
/// being changed.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: ProgressEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that keeps every event in memory, in delivery order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events belonging to `task_id`.
    #[must_use]
    pub fn events_for(&self, task_id: &TaskId) -> Vec<EventPayload> {
        self.events()
            .into_iter()
            .filter(|e| &e.task_id == task_id)
            .map(|e| e.payload)
            .collect()
    }

    /// The sequence of states announced for `task_id`.
    #[must_use]
    pub fn states_for(&self, task_id: &TaskId) -> Vec<TaskState> {
        self.events_for(task_id)
            .into_iter()
            .filter_map(|p| match p {
                EventPayload::Status { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
