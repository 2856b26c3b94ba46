//! Periodic JSON snapshot of the task registry.

use crate::error::Result;
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use sift_core::{TaskSnapshot, Timestamp};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// On-disk snapshot layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    pub saved_at: Timestamp,
    pub tasks: Vec<TaskSnapshot>,
}

/// Write `tasks` to `path` via a temp file and rename.
pub fn write_snapshot(path: &Path, tasks: Vec<TaskSnapshot>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = SnapshotFile {
        saved_at: Timestamp::now(),
        tasks,
    };
    let json = serde_json::to_vec_pretty(&file)?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<SnapshotFile> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

/// Save the registry every `interval` until `shutdown`, then once more.
pub fn spawn_snapshot_writer(
    scheduler: Scheduler,
    path: PathBuf,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => save(&scheduler, &path),
            }
        }
        save(&scheduler, &path);
        tracing::debug!(path = %path.display(), "Snapshot writer stopped");
    })
}

fn save(scheduler: &Scheduler, path: &Path) {
    let tasks = scheduler.snapshot();
    let count = tasks.len();
    match write_snapshot(path, tasks) {
        Ok(()) => tracing::trace!(tasks = count, "Snapshot saved to {}", path.display()),
        Err(e) => tracing::warn!("Failed to save snapshot to {}: {}", path.display(), e),
    }
}
