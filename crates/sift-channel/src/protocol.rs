//! Wire messages exchanged over the progress connection.
//!
//! Inbound frames are [`Command`]s tagged by `type`. Outbound frames are
//! either task events ([`ProgressEvent`]) or [`ControlMessage`]s.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sift_core::{ProgressEvent, TaskId, TaskOptions, TaskSnapshot};

const KNOWN_COMMANDS: [&str; 6] = ["start", "pause", "resume", "stop", "stop_all", "reconnect"];

/// Client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Submit one task per target
    Start {
        /// Raw target strings (queries or locators)
        targets: Vec<String>,
        /// Options shared by every submitted task
        #[serde(default)]
        options: TaskOptions,
    },
    /// Pause a task at its next page boundary
    Pause {
        /// Task to pause
        task_id: TaskId,
    },
    /// Resume a paused task
    Resume {
        /// Task to resume
        task_id: TaskId,
    },
    /// Stop one task
    Stop {
        /// Task to stop
        task_id: TaskId,
    },
    /// Stop every live task
    StopAll,
    /// Ask for a full snapshot of the registry
    Reconnect,
}

/// Parse one inbound text frame.
///
/// Returns `Ok(None)` for a JSON frame without a known command `type`;
/// such frames are ignored.
pub fn parse_command(text: &str) -> Result<Option<Command>> {
    let value: Value = serde_json::from_str(text)?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        tracing::debug!("Ignoring frame without a command type");
        return Ok(None);
    };

    if !KNOWN_COMMANDS.contains(&kind) {
        tracing::debug!(kind, "Ignoring unknown command type");
        return Ok(None);
    }

    let kind = kind.to_string();
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ProtocolError::Malformed(format!("{kind}: {e}")))
}

/// Channel-level replies that are not tied to a task event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Full registry view, sent in reply to `reconnect`
    Snapshot {
        /// Every known task in submission order
        tasks: Vec<TaskSnapshot>,
    },
    /// A command could not be applied
    Rejected {
        /// Stable machine-readable code
        code: String,
        /// Human-readable description
        message: String,
    },
}

impl ControlMessage {
    /// Build a `rejected` reply.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ProtocolError> for ControlMessage {
    fn from(err: &ProtocolError) -> Self {
        Self::rejected(err.code(), err.to_string())
    }
}

/// Any outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// A task event
    Event(ProgressEvent),
    /// A channel-level reply
    Control(ControlMessage),
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<ProgressEvent> for ServerMessage {
    fn from(event: ProgressEvent) -> Self {
        Self::Event(event)
    }
}

impl From<ControlMessage> for ServerMessage {
    fn from(message: ControlMessage) -> Self {
        Self::Control(message)
    }
}
