//! Application state management.

use sift_channel::ProgressHub;
use sift_core::{AppConfig, EventSink};
use sift_scanner::{SessionDeps, SessionSettings};
use sift_scheduler::Scheduler;
use std::sync::Arc;

/// State shared by every connection.
pub struct AppState {
    /// Owner of every submitted task
    pub scheduler: Scheduler,
    /// Event fan-out; the scheduler emits into it
    pub hub: Arc<ProgressHub>,
}

impl AppState {
    /// Wire a scheduler to a fresh hub using the loaded configuration.
    pub fn new(config: &AppConfig, deps: SessionDeps) -> Self {
        let hub = Arc::new(ProgressHub::new());
        let settings = SessionSettings {
            session: config.session.clone(),
            detection: config.detection.clone(),
            enrichment: config.enrichment.clone(),
            site: config.site.clone(),
        };
        let events: Arc<dyn EventSink> = hub.clone();
        let scheduler = Scheduler::new(deps, settings, events, config.scheduler.max_concurrency);

        tracing::info!(
            max_concurrency = config.scheduler.max_concurrency,
            "Scheduler ready"
        );

        Self { scheduler, hub }
    }
}
