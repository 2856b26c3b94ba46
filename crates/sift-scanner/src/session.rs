//! Session controller: drives one task through its pages.
//!
//! A controller owns one environment for the lifetime of the task. It walks
//! the listing pages, runs block detection and backoff, applies dedupe, runs
//! the optional enrichment pass and persists the result exactly once on exit.

use crate::control::{jittered, TaskControl};
use crate::detection::{BackoffDecision, BackoffPolicy, BackoffState, DetectionMonitor, Verdict};
use crate::extractor::Extractor;
use crate::url_builder::build_page_url;
use sift_browser::{BrowserError, Environment, EnvironmentLauncher, LoadedPage};
use sift_core::{
    DetectionConfig, EnrichmentConfig, EventPayload, SessionConfig, SiteConfig, TaskHandle,
    TaskState, Timestamp,
};
use sift_export::Persistence;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub launcher: Arc<dyn EnvironmentLauncher>,
    pub extractor: Arc<dyn Extractor>,
    pub persistence: Arc<dyn Persistence>,
}

/// Tunables shared by every session.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub session: SessionConfig,
    pub detection: DetectionConfig,
    pub enrichment: EnrichmentConfig,
    pub site: SiteConfig,
}

/// Why a session ended, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Completed,
    Stopped,
    PersistentDetection(String),
    Failed(String),
}

/// Why a page produced no content.
#[derive(Debug)]
enum PageFailure {
    /// The environment is gone; the task cannot continue
    Fatal(BrowserError),
    /// Navigation failed twice; move to the next page
    Skipped,
    Cancelled,
    PersistentDetection(String),
}

/// Number of listing pages to visit.
///
/// With an advertised count this is `ceil(total / page_size)`; without one
/// it is the fallback budget. Either way `max_pages` caps it.
#[must_use]
pub fn compute_total_pages(
    total_results: Option<u64>,
    page_size: u32,
    max_pages: Option<u32>,
    fallback: u32,
) -> u32 {
    let pages = match total_results {
        Some(total) => {
            let per_page = u64::from(page_size.max(1));
            u32::try_from(total.div_ceil(per_page)).unwrap_or(u32::MAX)
        }
        None => fallback,
    };
    max_pages.map_or(pages, |cap| pages.min(cap))
}

/// Drives one task from `Initializing` to a terminal state.
pub struct SessionController {
    task: TaskHandle,
    control: TaskControl,
    deps: SessionDeps,
    settings: Arc<SessionSettings>,
    monitor: DetectionMonitor,
    backoff: BackoffState,
}

impl SessionController {
    /// The task must already be in `Initializing`.
    pub fn new(
        task: TaskHandle,
        control: TaskControl,
        deps: SessionDeps,
        settings: Arc<SessionSettings>,
    ) -> Self {
        let monitor = DetectionMonitor::new(&settings.detection);
        let backoff = BackoffState::new(BackoffPolicy::from_config(&settings.detection));
        Self {
            task,
            control,
            deps,
            settings,
            monitor,
            backoff,
        }
    }

    /// Run the session to completion and return the terminal state.
    pub async fn run(mut self) -> TaskState {
        let task_id = self.task.id().clone();
        tracing::info!(task_id = %task_id, "Session started");

        let outcome = self.execute().await;
        let state = self.finalize(outcome).await;

        tracing::info!(task_id = %task_id, state = %state, "Session finished");
        state
    }

    async fn execute(&mut self) -> Outcome {
        let env = match self.acquire().await {
            Ok(Some(env)) => env,
            Ok(None) => return Outcome::Stopped,
            Err(e) => return Outcome::Failed(format!("environment error: {e}")),
        };

        let mut outcome = match self.task.transition(TaskState::Running, None) {
            Ok(()) => self.scan_pages(env.as_ref()).await,
            Err(e) => Outcome::Failed(e.to_string()),
        };

        let enrich = self.task.read(|t| t.options().enrich.clone());
        if outcome == Outcome::Completed && !enrich.is_empty() {
            outcome = self.enrich(env.as_ref(), &enrich).await;
        }

        env.close().await;
        outcome
    }

    /// Launch an environment, retrying with a fixed delay. `Ok(None)` means cancelled.
    async fn acquire(&self) -> Result<Option<Box<dyn Environment>>, BrowserError> {
        let config = &self.settings.session;
        let attempts = config.acquire_attempts.max(1);
        let delay = Duration::from_millis(config.acquire_delay_ms);

        let mut attempt = 1;
        loop {
            if self.control.is_cancelled() {
                return Ok(None);
            }
            match self.deps.launcher.launch().await {
                Ok(env) => return Ok(Some(env)),
                Err(e) if attempt >= attempts => {
                    tracing::error!(task_id = %self.task.id(), "Environment acquisition failed: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %self.task.id(),
                        "Environment launch failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        attempts,
                        delay,
                        e
                    );
                    if !self.control.sleep(delay).await {
                        return Ok(None);
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn scan_pages(&mut self, env: &dyn Environment) -> Outcome {
        let (target, options) = self.task.read(|t| (t.target().clone(), t.options().clone()));
        let fallback = self.settings.session.fallback_page_budget;
        let threshold = self.settings.session.empty_page_threshold.max(1);
        let started = Instant::now();

        let mut total_pages: Option<u32> = None;
        let mut consecutive_empty = 0;
        let mut page = 1;

        loop {
            if total_pages.is_some_and(|total| page > total) {
                return Outcome::Completed;
            }
            if self.control.is_cancelled() {
                return Outcome::Stopped;
            }
            if self.control.is_paused() && !self.hold_while_paused().await {
                return Outcome::Stopped;
            }
            if let Err(e) = self.task.update(|t| t.set_page(page)) {
                return Outcome::Failed(e.to_string());
            }

            let url = match build_page_url(&self.settings.site, &target, page, options.page_size) {
                Ok(url) => url,
                Err(e) => return Outcome::Failed(e.to_string()),
            };

            if page > 1 {
                let session = &self.settings.session;
                let delay = jittered(session.page_delay_min_ms, session.page_delay_max_ms);
                if !self.control.sleep(delay).await {
                    return Outcome::Stopped;
                }
            }

            let loaded = match self.load_page(env, &url).await {
                Ok(loaded) => Some(loaded),
                Err(PageFailure::Skipped) => None,
                Err(PageFailure::Cancelled) => return Outcome::Stopped,
                Err(PageFailure::PersistentDetection(reason)) => {
                    return Outcome::PersistentDetection(reason)
                }
                Err(PageFailure::Fatal(e)) => return Outcome::Failed(format!("environment error: {e}")),
            };

            if total_pages.is_none() {
                let advertised = loaded
                    .as_ref()
                    .and_then(|l| self.deps.extractor.total_results(l));
                let total = compute_total_pages(advertised, options.page_size, options.max_pages, fallback);
                tracing::info!(
                    task_id = %self.task.id(),
                    advertised = ?advertised,
                    "Scanning up to {} pages",
                    total
                );
                if let Err(e) = self.task.update(|t| t.set_total_pages(total)) {
                    return Outcome::Failed(e.to_string());
                }
                total_pages = Some(total);
                if total == 0 {
                    return Outcome::Completed;
                }
            }

            let Some(loaded) = loaded else {
                tracing::warn!(task_id = %self.task.id(), page, "Skipping page after failed navigation");
                page += 1;
                continue;
            };

            let candidates = self.deps.extractor.extract(&loaded).unwrap_or_else(|e| {
                tracing::warn!(task_id = %self.task.id(), page, "Extraction failed: {}", e);
                Vec::new()
            });
            let page_records = candidates.len();

            let appended = self.task.update(|t| {
                let added = t.append_records(candidates, Timestamp::now())?;
                Ok((added, t.records().len()))
            });
            let (new_records, total_records) = match appended {
                Ok(counts) => counts,
                Err(e) => return Outcome::Failed(e.to_string()),
            };

            self.task.emit(EventPayload::Progress {
                page,
                total_pages: total_pages.unwrap_or(page),
                page_records,
                new_records,
                total_records,
                throughput: throughput(total_records, started.elapsed()),
            });

            if page_records == 0 {
                consecutive_empty += 1;
                if consecutive_empty >= threshold {
                    tracing::info!(
                        task_id = %self.task.id(),
                        page,
                        "{} consecutive empty pages, ending scan",
                        consecutive_empty
                    );
                    return Outcome::Completed;
                }
            } else {
                consecutive_empty = 0;
            }

            if self.deps.extractor.is_last_page(&loaded) {
                return Outcome::Completed;
            }
            page += 1;
        }
    }

    async fn hold_while_paused(&self) -> bool {
        if let Err(e) = self.task.transition(TaskState::Paused, None) {
            tracing::warn!(task_id = %self.task.id(), "Cannot pause: {}", e);
            return true;
        }
        tracing::info!(task_id = %self.task.id(), "Session paused");
        if !self.control.wait_while_paused().await {
            return false;
        }
        if let Err(e) = self.task.transition(TaskState::Running, None) {
            tracing::warn!(task_id = %self.task.id(), "Cannot resume: {}", e);
        }
        true
    }

    /// Navigate with one retry, then clear any detection interstitial.
    async fn load_page(&mut self, env: &dyn Environment, url: &str) -> Result<LoadedPage, PageFailure> {
        let mut loaded = self.navigate_with_retry(env, url).await?;

        loop {
            let reason = match self.monitor.inspect(&loaded) {
                Verdict::Clear => {
                    self.backoff.on_clear();
                    return Ok(loaded);
                }
                Verdict::Blocked { reason } => reason,
            };

            tracing::warn!(task_id = %self.task.id(), url, "Detection signal: {}", reason);
            let (wait, retry_count) = match self.backoff.on_detection() {
                BackoffDecision::Wait { wait, retry_count } => (wait, retry_count),
                BackoffDecision::Exhausted => return Err(PageFailure::PersistentDetection(reason)),
            };

            // Counter is informational; failure here only means the task was finalized.
            let _ = self.task.update(|t| t.count_detection_retry());
            self.task.emit(EventPayload::RateLimited {
                wait_seconds: wait.as_secs(),
                retry_count,
            });
            if let Err(e) = self.task.transition(TaskState::AwaitingBackoff, Some(reason)) {
                tracing::warn!(task_id = %self.task.id(), "Cannot enter backoff: {}", e);
            }

            if !self.control.sleep(wait).await {
                return Err(PageFailure::Cancelled);
            }
            let reloaded = env.load(url).await;
            if let Err(e) = self.task.transition(TaskState::Running, None) {
                tracing::warn!(task_id = %self.task.id(), "Cannot leave backoff: {}", e);
            }

            loaded = match reloaded {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(PageFailure::Fatal(e)),
                Err(e) => {
                    tracing::warn!(task_id = %self.task.id(), url, "Reload after backoff failed: {}", e);
                    return Err(PageFailure::Skipped);
                }
            };
        }
    }

    async fn navigate_with_retry(&self, env: &dyn Environment, url: &str) -> Result<LoadedPage, PageFailure> {
        match env.load(url).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_fatal() => return Err(PageFailure::Fatal(e)),
            Err(e) => {
                tracing::warn!(task_id = %self.task.id(), url, "Navigation failed, retrying once: {}", e);
            }
        }

        let _ = self.task.update(|t| t.count_navigation_retry());
        let delay = Duration::from_millis(self.settings.session.navigation_retry_delay_ms);
        if !self.control.sleep(delay).await {
            return Err(PageFailure::Cancelled);
        }

        match env.load(url).await {
            Ok(page) => Ok(page),
            Err(e) if e.is_fatal() => Err(PageFailure::Fatal(e)),
            Err(e) => {
                tracing::warn!(task_id = %self.task.id(), url, "Navigation retry failed: {}", e);
                Err(PageFailure::Skipped)
            }
        }
    }

    /// Visit detail pages for records missing any of `fields`.
    ///
    /// Uses its own isolated context so detail navigation never disturbs the
    /// listing session. Individual failures are skipped; a run of
    /// `max_consecutive_failures` abandons the pass.
    async fn enrich(&self, env: &dyn Environment, fields: &[String]) -> Outcome {
        let pending: Vec<(usize, String)> = self.task.read(|t| {
            t.records()
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_missing_any(fields))
                .map(|(i, r)| (i, r.url.clone()))
                .collect()
        });
        if pending.is_empty() {
            return Outcome::Completed;
        }

        let config = &self.settings.enrichment;
        let every = config.progress_every.max(1);
        let total = pending.len();
        tracing::info!(task_id = %self.task.id(), "Enriching {} records", total);

        let mut detail_env: Option<Box<dyn Environment>> = None;
        let mut consecutive_failures = 0;
        let mut outcome = Outcome::Completed;
        let mut visited = 0;

        for (index, url) in &pending {
            if self.control.is_cancelled() {
                outcome = Outcome::Stopped;
                break;
            }
            if visited > 0 {
                let delay = jittered(config.delay_min_ms, config.delay_max_ms);
                if !self.control.sleep(delay).await {
                    outcome = Outcome::Stopped;
                    break;
                }
            }
            if self.control.is_paused() && !self.hold_while_paused().await {
                outcome = Outcome::Stopped;
                break;
            }

            match self.fetch_details(env, &mut detail_env, url, fields).await {
                Ok(values) => {
                    consecutive_failures = 0;
                    let _ = self
                        .task
                        .update(|t| t.update_record(*index, |r| r.details.extend(values)));
                }
                Err(reason) => {
                    consecutive_failures += 1;
                    tracing::warn!(task_id = %self.task.id(), url = %url, "Detail fetch failed: {}", reason);
                }
            }

            visited += 1;
            if visited % every == 0 || visited == total {
                self.task.emit(EventPayload::DetailProgress {
                    current: visited,
                    total,
                });
            }

            if config.max_consecutive_failures > 0
                && consecutive_failures >= config.max_consecutive_failures
            {
                tracing::warn!(
                    task_id = %self.task.id(),
                    "Abandoning enrichment after {} consecutive failures",
                    consecutive_failures
                );
                if visited % every != 0 && visited != total {
                    self.task.emit(EventPayload::DetailProgress {
                        current: visited,
                        total,
                    });
                }
                break;
            }
        }

        if let Some(detail_env) = detail_env {
            detail_env.close().await;
        }
        outcome
    }

    async fn fetch_details(
        &self,
        env: &dyn Environment,
        detail_env: &mut Option<Box<dyn Environment>>,
        url: &str,
        fields: &[String],
    ) -> Result<BTreeMap<String, String>, String> {
        if detail_env.is_none() {
            *detail_env = Some(env.isolated().await.map_err(|e| e.to_string())?);
        }
        let Some(context) = detail_env.as_ref() else {
            return Err("no detail context".to_string());
        };

        let loaded = context.load(url).await;
        match loaded {
            Ok(page) => {
                if let Verdict::Blocked { reason } = self.monitor.inspect(&page) {
                    return Err(format!("blocked: {reason}"));
                }
                self.deps
                    .extractor
                    .extract_details(&page, fields)
                    .map_err(|e| e.to_string())
            }
            Err(e) => {
                if e.is_fatal() {
                    // Reopen on the next record.
                    if let Some(broken) = detail_env.take() {
                        broken.close().await;
                    }
                }
                Err(e.to_string())
            }
        }
    }

    /// Persist once, then move to the terminal state and emit the final events.
    async fn finalize(&self, outcome: Outcome) -> TaskState {
        let (label, fields, records) = self.task.read(|t| {
            (
                t.label().to_string(),
                t.options().enrich.clone(),
                t.records().to_vec(),
            )
        });
        let count = records.len();

        let persisted = self.deps.persistence.persist(&label, &fields, &records).await;
        let (paths, export_error) = match persisted {
            Ok(paths) => (paths, None),
            Err(e) => {
                tracing::error!(task_id = %self.task.id(), "Export failed: {}", e);
                (Vec::new(), Some(format!("export failed: {e}")))
            }
        };

        if !paths.is_empty() {
            self.task.emit(EventPayload::FilesSaved {
                paths: paths.iter().map(|p| p.display().to_string()).collect(),
            });
        }
        let output_ref = paths.first().map(|p| p.display().to_string());

        let (state, message, error, emit_complete) = match outcome {
            Outcome::Completed => (TaskState::Completed, export_error.clone(), export_error, true),
            Outcome::Stopped => (
                TaskState::Stopped,
                Some(join_reason("stopped by request", export_error.as_deref())),
                export_error,
                true,
            ),
            Outcome::PersistentDetection(reason) => {
                tracing::warn!(task_id = %self.task.id(), "Stopping after persistent detection: {}", reason);
                let message = join_reason("persistent detection", export_error.as_deref());
                (TaskState::Stopped, Some(message.clone()), Some(message), false)
            }
            Outcome::Failed(reason) => {
                let message = join_reason(&reason, export_error.as_deref());
                (TaskState::Failed, Some(message.clone()), Some(message), false)
            }
        };

        if let Err(e) = self.task.transition(state, message) {
            tracing::error!(task_id = %self.task.id(), "Cannot finalize task: {}", e);
            return self.task.state();
        }

        if let Some(message) = error {
            self.task.emit(EventPayload::Error {
                message,
                partial_count: count,
            });
        }
        if emit_complete {
            self.task.emit(EventPayload::Complete {
                total_records: count,
                duration_ms: self.task.read(sift_core::Task::duration_ms),
                output_ref,
            });
        }
        state
    }
}

fn join_reason(reason: &str, export_error: Option<&str>) -> String {
    match export_error {
        Some(export) => format!("{reason}; {export}"),
        None => reason.to_string(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn throughput(total_records: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        total_records as f64 / secs
    } else {
        0.0
    }
}
