use sift_browser::{BrowserError, Environment, EnvironmentLauncher, LoadedPage};
use sift_core::{
    EventPayload, MemorySink, Record, Target, Task, TaskHandle, TaskOptions, TaskState,
};
use sift_export::Persistence;
use sift_scanner::{
    ExtractionError, Extractor, SessionController, SessionDeps, SessionSettings, TaskControl,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(&str) -> Result<LoadedPage, BrowserError> + Send + Sync;

/// Fake site: answers every load from a closure and records the URLs visited.
struct ScriptedSite {
    responder: Box<Responder>,
    loads: Mutex<Vec<String>>,
    launch_failures: AtomicU32,
    launches: AtomicU32,
}

impl ScriptedSite {
    fn new(responder: impl Fn(&str) -> Result<LoadedPage, BrowserError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            loads: Mutex::new(Vec::new()),
            launch_failures: AtomicU32::new(0),
            launches: AtomicU32::new(0),
        })
    }

    fn failing_launches(self: Arc<Self>, n: u32) -> Arc<Self> {
        self.launch_failures.store(n, Ordering::SeqCst);
        self
    }

    fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }

    fn page_loads(&self, page: u32) -> usize {
        self.loads()
            .iter()
            .filter(|u| page_of(u) == Some(page))
            .count()
    }

    fn detail_loads(&self) -> usize {
        self.loads().iter().filter(|u| u.contains("/itm/")).count()
    }
}

struct ScriptedLauncher(Arc<ScriptedSite>);

#[async_trait::async_trait]
impl EnvironmentLauncher for ScriptedLauncher {
    async fn launch(&self) -> sift_browser::Result<Box<dyn Environment>> {
        self.0.launches.fetch_add(1, Ordering::SeqCst);
        let remaining = self.0.launch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.0.launch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BrowserError::ChromiumError("no browser binary".to_string()));
        }
        Ok(Box::new(ScriptedEnv(self.0.clone())))
    }
}

struct ScriptedEnv(Arc<ScriptedSite>);

#[async_trait::async_trait]
impl Environment for ScriptedEnv {
    async fn load(&self, url: &str) -> sift_browser::Result<LoadedPage> {
        self.0.loads.lock().unwrap().push(url.to_string());
        (self.0.responder)(url)
    }

    async fn isolated(&self) -> sift_browser::Result<Box<dyn Environment>> {
        Ok(Box::new(ScriptedEnv(self.0.clone())))
    }

    async fn close(&self) {}
}

fn page_of(url: &str) -> Option<u32> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "_pgn")
        .and_then(|(_, v)| v.parse().ok())
}

fn html(url: &str, body: &str) -> Result<LoadedPage, BrowserError> {
    Ok(LoadedPage {
        url: url.to_string(),
        title: "Results".to_string(),
        html: body.to_string(),
    })
}

/// Listing body with `item:` lines for each id.
fn items(ids: &[&str]) -> String {
    ids.iter().map(|id| format!("item:{id}\n")).collect()
}

/// Understands `total:N`, `item:ID`, `end` and `detail:key=value` lines.
struct LineExtractor;

impl Extractor for LineExtractor {
    fn extract(&self, page: &LoadedPage) -> Result<Vec<Record>, ExtractionError> {
        Ok(page
            .html
            .lines()
            .filter_map(|l| l.strip_prefix("item:"))
            .map(|id| {
                Record::new(
                    id,
                    format!("Item {id}"),
                    format!("https://www.example.com/itm/{id}"),
                )
            })
            .collect())
    }

    fn total_results(&self, page: &LoadedPage) -> Option<u64> {
        page.html
            .lines()
            .find_map(|l| l.strip_prefix("total:"))
            .and_then(|n| n.parse().ok())
    }

    fn is_last_page(&self, page: &LoadedPage) -> bool {
        page.html.lines().any(|l| l == "end")
    }

    fn extract_details(
        &self,
        page: &LoadedPage,
        fields: &[String],
    ) -> Result<BTreeMap<String, String>, ExtractionError> {
        let values: BTreeMap<String, String> = page
            .html
            .lines()
            .filter_map(|l| l.strip_prefix("detail:"))
            .filter_map(|kv| kv.split_once('='))
            .filter(|(k, _)| fields.iter().any(|f| f == k))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if values.is_empty() {
            return Err(ExtractionError::new("no detail fields"));
        }
        Ok(values)
    }
}

#[derive(Default)]
struct MemoryPersistence {
    calls: Mutex<Vec<(String, Vec<Record>)>>,
    fields: Mutex<Vec<Vec<String>>>,
    fail: bool,
}

impl MemoryPersistence {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, Vec<Record>)> {
        self.calls.lock().unwrap().clone()
    }

    fn fields(&self) -> Vec<Vec<String>> {
        self.fields.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    async fn persist(
        &self,
        label: &str,
        fields: &[String],
        records: &[Record],
    ) -> sift_export::Result<Vec<PathBuf>> {
        self.fields.lock().unwrap().push(fields.to_vec());
        self.calls
            .lock()
            .unwrap()
            .push((label.to_string(), records.to_vec()));
        if self.fail {
            return Err(sift_export::ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        Ok(vec![PathBuf::from(format!("/exports/{label}.csv"))])
    }
}

struct Harness {
    handle: TaskHandle,
    control: TaskControl,
    sink: Arc<MemorySink>,
    persistence: Arc<MemoryPersistence>,
    controller: SessionController,
}

fn harness(
    site: &Arc<ScriptedSite>,
    options: TaskOptions,
    settings: SessionSettings,
    persistence: MemoryPersistence,
) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let task = Task::new(1, Target::parse("leica"), options);
    let handle = TaskHandle::new(task, sink.clone());
    handle
        .transition(TaskState::Initializing, None)
        .expect("queued -> initializing");

    let persistence = Arc::new(persistence);
    let control = TaskControl::new();
    let deps = SessionDeps {
        launcher: Arc::new(ScriptedLauncher(site.clone())),
        extractor: Arc::new(LineExtractor),
        persistence: persistence.clone(),
    };
    let controller =
        SessionController::new(handle.clone(), control.clone(), deps, Arc::new(settings));

    Harness {
        handle,
        control,
        sink,
        persistence,
        controller,
    }
}

fn simple(site: &Arc<ScriptedSite>, options: TaskOptions) -> Harness {
    harness(site, options, SessionSettings::default(), MemoryPersistence::default())
}

#[tokio::test(start_paused = true)]
async fn test_advertised_total_sets_page_count() {
    let site = ScriptedSite::new(|url| {
        let page = page_of(url).unwrap_or(0);
        let mut body = items(&[&format!("{page}a"), &format!("{page}b")]);
        if page == 1 {
            body.push_str("total:185\n");
        }
        html(url, &body)
    });
    let h = simple(&site, TaskOptions::default());
    let id = h.handle.id().clone();

    let state = h.controller.run().await;

    assert_eq!(state, TaskState::Completed);
    assert_eq!(h.handle.snapshot().total_pages, Some(4));
    assert_eq!(site.page_loads(4), 1);
    assert_eq!(site.page_loads(5), 0);

    let events = h.sink.events_for(&id);
    let progress: Vec<(u32, u32)> = events
        .iter()
        .filter_map(|e| match e {
            EventPayload::Progress { page, total_pages, .. } => Some((*page, *total_pages)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);

    assert_eq!(
        h.sink.states_for(&id),
        vec![TaskState::Initializing, TaskState::Running, TaskState::Completed]
    );
    let tail = &events[events.len() - 3..];
    assert!(matches!(tail[0], EventPayload::FilesSaved { .. }));
    assert!(matches!(tail[1], EventPayload::Status { state: TaskState::Completed, .. }));
    assert!(matches!(
        &tail[2],
        EventPayload::Complete { total_records: 8, output_ref: Some(path), .. } if path == "/exports/leica.csv"
    ));

    let calls = h.persistence.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "leica");
    assert_eq!(calls[0].1.len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_empty_pages_end_scan() {
    let site = ScriptedSite::new(|url| match page_of(url) {
        Some(1) => html(url, &items(&["a", "b"])),
        Some(2) => html(url, &items(&["c"])),
        _ => html(url, ""),
    });
    let h = simple(&site, TaskOptions::default());

    let state = h.controller.run().await;

    assert_eq!(state, TaskState::Completed);
    assert_eq!(h.handle.snapshot().total_pages, Some(10));
    assert_eq!(site.page_loads(5), 1);
    assert_eq!(site.page_loads(6), 0);
    assert_eq!(h.persistence.calls()[0].1.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_detection_stops_with_partial_results() {
    let site = ScriptedSite::new(|url| match page_of(url) {
        Some(1) => html(url, &format!("total:600\n{}", items(&["a", "b"]))),
        Some(2) => html(url, &items(&["c", "d"])),
        _ => html(url, r#"<div class="g-recaptcha"></div>"#),
    });
    let h = simple(&site, TaskOptions::default());
    let id = h.handle.id().clone();

    let started = tokio::time::Instant::now();
    let state = h.controller.run().await;

    assert_eq!(state, TaskState::Stopped);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(site.page_loads(3), 2);
    assert_eq!(site.page_loads(4), 0);

    let events = h.sink.events_for(&id);
    let backoffs: Vec<(u64, u32)> = events
        .iter()
        .filter_map(|e| match e {
            EventPayload::RateLimited { wait_seconds, retry_count } => {
                Some((*wait_seconds, *retry_count))
            }
            _ => None,
        })
        .collect();
    assert_eq!(backoffs, vec![(30, 1)]);

    assert_eq!(
        h.sink.states_for(&id),
        vec![
            TaskState::Initializing,
            TaskState::Running,
            TaskState::AwaitingBackoff,
            TaskState::Running,
            TaskState::Stopped,
        ]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        EventPayload::Error { message, partial_count: 4 } if message == "persistent detection"
    )));
    assert!(!events.iter().any(|e| matches!(e, EventPayload::Complete { .. })));

    let calls = h.persistence.calls();
    assert_eq!(calls.len(), 1);
    let ids: Vec<&str> = calls[0].1.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_recovers_when_page_clears() {
    let blocked_once = Arc::new(AtomicU32::new(0));
    let counter = blocked_once.clone();
    let site = ScriptedSite::new(move |url| match page_of(url) {
        Some(1) => html(url, &format!("total:120\n{}", items(&["a"]))),
        Some(2) if counter.fetch_add(1, Ordering::SeqCst) == 0 => {
            html(url, r#"<div class="g-recaptcha"></div>"#)
        }
        _ => html(url, &items(&["b"])),
    });
    let h = simple(&site, TaskOptions::default());

    let state = h.controller.run().await;

    assert_eq!(state, TaskState::Completed);
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.detection_retries, 1);
    assert_eq!(snapshot.total_records, 2);
}

#[tokio::test(start_paused = true)]
async fn test_dedupe_drops_repeated_ids() {
    let responder = |url: &str| match page_of(url) {
        Some(1) => html(url, &items(&["a", "b"])),
        Some(2) => html(url, &items(&["b", "c"])),
        _ => html(url, &format!("{}end\n", items(&["c"]))),
    };

    let site = ScriptedSite::new(responder);
    let h = simple(&site, TaskOptions::default());
    let id = h.handle.id().clone();
    assert_eq!(h.controller.run().await, TaskState::Completed);

    let new_counts: Vec<usize> = h
        .sink
        .events_for(&id)
        .iter()
        .filter_map(|e| match e {
            EventPayload::Progress { new_records, .. } => Some(*new_records),
            _ => None,
        })
        .collect();
    assert_eq!(new_counts, vec![2, 1, 0]);
    assert_eq!(h.handle.snapshot().total_records, 3);

    let site = ScriptedSite::new(responder);
    let options = TaskOptions {
        dedupe: false,
        ..TaskOptions::default()
    };
    let h = simple(&site, options);
    assert_eq!(h.controller.run().await, TaskState::Completed);
    assert_eq!(h.handle.snapshot().total_records, 5);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_failure_fails_task() {
    let site = ScriptedSite::new(|url| html(url, "")).failing_launches(3);
    let h = simple(&site, TaskOptions::default());
    let id = h.handle.id().clone();

    let state = h.controller.run().await;

    assert_eq!(state, TaskState::Failed);
    assert_eq!(site.launches.load(Ordering::SeqCst), 3);
    assert!(site.loads().is_empty());
    assert_eq!(
        h.sink.states_for(&id),
        vec![TaskState::Initializing, TaskState::Failed]
    );
    let events = h.sink.events_for(&id);
    assert!(matches!(
        events.last(),
        Some(EventPayload::Error { message, partial_count: 0 }) if message.starts_with("environment error")
    ));
    assert_eq!(h.persistence.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_retries_before_giving_up() {
    let site = ScriptedSite::new(|url| html(url, &format!("end\n{}", items(&["a"])))).failing_launches(2);
    let h = simple(&site, TaskOptions::default());

    assert_eq!(h.controller.run().await, TaskState::Completed);
    assert_eq!(site.launches.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_navigation_retried_once_then_skipped() {
    let site = ScriptedSite::new(|url| match page_of(url) {
        Some(1) => html(url, &format!("total:180\n{}", items(&["a"]))),
        Some(2) => Err(BrowserError::NavigationError("net::ERR_CONNECTION_RESET".to_string())),
        _ => html(url, &items(&["c"])),
    });
    let h = simple(&site, TaskOptions::default());

    let state = h.controller.run().await;

    assert_eq!(state, TaskState::Completed);
    assert_eq!(site.page_loads(2), 2);
    assert_eq!(site.page_loads(3), 1);
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.navigation_retries, 1);
    assert_eq!(snapshot.total_records, 2);
}

#[tokio::test(start_paused = true)]
async fn test_crashed_environment_fails_with_partial_results() {
    let site = ScriptedSite::new(|url| match page_of(url) {
        Some(1) => html(url, &format!("total:600\n{}", items(&["a", "b"]))),
        _ => Err(BrowserError::Crashed("target closed".to_string())),
    });
    let h = simple(&site, TaskOptions::default());
    let id = h.handle.id().clone();

    let state = h.controller.run().await;

    assert_eq!(state, TaskState::Failed);
    assert_eq!(site.page_loads(2), 1);
    let events = h.sink.events_for(&id);
    assert!(events.iter().any(|e| matches!(e, EventPayload::FilesSaved { .. })));
    assert!(matches!(
        events.last(),
        Some(EventPayload::Error { partial_count: 2, .. })
    ));
    assert_eq!(h.persistence.calls()[0].1.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_page_delay_stops_task() {
    let site = ScriptedSite::new(|url| html(url, &format!("total:600\n{}", items(&[url]))));
    let mut settings = SessionSettings::default();
    settings.session.page_delay_min_ms = 60_000;
    settings.session.page_delay_max_ms = 60_000;
    let h = harness(&site, TaskOptions::default(), settings, MemoryPersistence::default());
    let id = h.handle.id().clone();
    let control = h.control.clone();

    let run = tokio::spawn(h.controller.run());
    tokio::time::sleep(Duration::from_secs(90)).await;
    control.cancel();
    let state = run.await.expect("session task");

    assert_eq!(state, TaskState::Stopped);
    assert_eq!(site.page_loads(2), 1);
    assert_eq!(site.page_loads(3), 0);

    let events = h.sink.events_for(&id);
    assert!(matches!(
        events.last(),
        Some(EventPayload::Complete { total_records: 2, .. })
    ));
    assert_eq!(h.handle.snapshot().message.as_deref(), Some("stopped by request"));
    assert_eq!(h.persistence.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let site = ScriptedSite::new(|url| html(url, &format!("end\n{}", items(&["a"]))));
    let h = simple(&site, TaskOptions::default());
    let id = h.handle.id().clone();
    h.control.pause();

    let run = tokio::spawn(h.controller.run());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.handle.state(), TaskState::Paused);
    assert!(site.loads().is_empty());

    h.control.resume();
    let state = run.await.expect("session task");

    assert_eq!(state, TaskState::Completed);
    assert_eq!(
        h.sink.states_for(&id),
        vec![
            TaskState::Initializing,
            TaskState::Running,
            TaskState::Paused,
            TaskState::Running,
            TaskState::Completed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_paused() {
    let site = ScriptedSite::new(|url| html(url, &items(&["a"])));
    let h = simple(&site, TaskOptions::default());
    h.control.pause();

    let run = tokio::spawn(h.controller.run());
    tokio::time::sleep(Duration::from_secs(10)).await;
    h.control.cancel();

    assert_eq!(run.await.expect("session task"), TaskState::Stopped);
    assert!(site.loads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_enrichment_fills_missing_fields() {
    let site = ScriptedSite::new(|url| {
        if url.ends_with("/itm/1") {
            html(url, "detail:seller=alice\n")
        } else if url.ends_with("/itm/2") {
            html(url, "detail:seller=bob\n")
        } else {
            html(url, &format!("total:2\n{}", items(&["1", "2"])))
        }
    });
    let options = TaskOptions {
        enrich: vec!["seller".to_string()],
        ..TaskOptions::default()
    };
    let h = simple(&site, options);
    let id = h.handle.id().clone();

    assert_eq!(h.controller.run().await, TaskState::Completed);

    let records = &h.persistence.calls()[0].1;
    let sellers: Vec<Option<&str>> = records
        .iter()
        .map(|r| r.details.get("seller").map(String::as_str))
        .collect();
    assert_eq!(sellers, vec![Some("alice"), Some("bob")]);
    assert_eq!(h.persistence.fields(), vec![vec!["seller".to_string()]]);

    let detail: Vec<(usize, usize)> = h
        .sink
        .events_for(&id)
        .iter()
        .filter_map(|e| match e {
            EventPayload::DetailProgress { current, total } => Some((*current, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(detail, vec![(2, 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_pause_during_enrichment_holds_detail_visits() {
    let site = ScriptedSite::new(|url| {
        if url.contains("/itm/") {
            html(url, "detail:seller=alice\n")
        } else {
            html(url, &format!("total:4\n{}", items(&["1", "2", "3", "4"])))
        }
    });
    let options = TaskOptions {
        enrich: vec!["seller".to_string()],
        ..TaskOptions::default()
    };
    let h = simple(&site, options);
    let id = h.handle.id().clone();

    let run = tokio::spawn(h.controller.run());
    for _ in 0..1000 {
        if site.detail_loads() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(site.detail_loads(), 1);
    h.control.pause();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.handle.state(), TaskState::Paused);
    assert_eq!(site.detail_loads(), 1);

    h.control.resume();
    assert_eq!(run.await.expect("session task"), TaskState::Completed);
    assert_eq!(site.detail_loads(), 4);
    assert_eq!(
        h.sink.states_for(&id),
        vec![
            TaskState::Initializing,
            TaskState::Running,
            TaskState::Paused,
            TaskState::Running,
            TaskState::Completed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_paused_in_enrichment() {
    let site = ScriptedSite::new(|url| {
        if url.contains("/itm/") {
            html(url, "detail:seller=alice\n")
        } else {
            html(url, &format!("total:3\n{}", items(&["1", "2", "3"])))
        }
    });
    let options = TaskOptions {
        enrich: vec!["seller".to_string()],
        ..TaskOptions::default()
    };
    let h = simple(&site, options);

    let run = tokio::spawn(h.controller.run());
    for _ in 0..1000 {
        if site.detail_loads() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.control.pause();
    tokio::time::sleep(Duration::from_secs(30)).await;
    h.control.cancel();

    assert_eq!(run.await.expect("session task"), TaskState::Stopped);
    assert_eq!(site.detail_loads(), 1);
    assert_eq!(h.persistence.calls()[0].1.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_enrichment_abandoned_after_consecutive_failures() {
    let site = ScriptedSite::new(|url| {
        if url.contains("/itm/") {
            Err(BrowserError::Timeout("detail page".to_string()))
        } else {
            html(url, &format!("total:4\n{}", items(&["1", "2", "3", "4"])))
        }
    });
    let mut settings = SessionSettings::default();
    settings.enrichment.max_consecutive_failures = 2;
    let options = TaskOptions {
        enrich: vec!["seller".to_string()],
        ..TaskOptions::default()
    };
    let h = harness(&site, options, settings, MemoryPersistence::default());
    let id = h.handle.id().clone();

    assert_eq!(h.controller.run().await, TaskState::Completed);
    assert_eq!(site.detail_loads(), 2);
    assert!(h.sink.events_for(&id).iter().any(|e| matches!(
        e,
        EventPayload::DetailProgress { current: 2, total: 4 }
    )));
    assert_eq!(h.persistence.calls()[0].1.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_export_failure_reported_but_task_completes() {
    let site = ScriptedSite::new(|url| html(url, &format!("end\n{}", items(&["a"]))));
    let h = harness(
        &site,
        TaskOptions::default(),
        SessionSettings::default(),
        MemoryPersistence::failing(),
    );
    let id = h.handle.id().clone();

    assert_eq!(h.controller.run().await, TaskState::Completed);

    let events = h.sink.events_for(&id);
    assert!(!events.iter().any(|e| matches!(e, EventPayload::FilesSaved { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        EventPayload::Error { message, partial_count: 1 } if message.contains("disk full")
    )));
    assert!(matches!(
        events.last(),
        Some(EventPayload::Complete { output_ref: None, .. })
    ));
    assert!(h
        .handle
        .snapshot()
        .message
        .is_some_and(|m| m.starts_with("export failed")));
}
