//! Block-page detection and the linear backoff applied when it fires.

use sift_browser::LoadedPage;
use sift_core::DetectionConfig;
use std::time::Duration;

/// Outcome of inspecting one loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No detection markers present
    Clear,
    /// The target served a challenge or block page
    Blocked {
        /// Which marker matched
        reason: String,
    },
}

/// Matches loaded pages against configured block-page markers.
///
/// Markers are compared case-insensitively against the final URL, the title
/// and the body.
#[derive(Debug, Clone)]
pub struct DetectionMonitor {
    url_markers: Vec<String>,
    title_markers: Vec<String>,
    body_markers: Vec<String>,
}

impl DetectionMonitor {
    #[must_use]
    pub fn new(config: &DetectionConfig) -> Self {
        let lower = |markers: &[String]| -> Vec<String> {
            markers
                .iter()
                .filter(|m| !m.trim().is_empty())
                .map(|m| m.to_lowercase())
                .collect()
        };
        Self {
            url_markers: lower(&config.url_markers),
            title_markers: lower(&config.title_markers),
            body_markers: lower(&config.body_markers),
        }
    }

    #[must_use]
    pub fn inspect(&self, page: &LoadedPage) -> Verdict {
        let url = page.url.to_lowercase();
        if let Some(marker) = self.url_markers.iter().find(|m| url.contains(m.as_str())) {
            return Verdict::Blocked {
                reason: format!("url matched \"{marker}\""),
            };
        }

        let title = page.title.to_lowercase();
        if let Some(marker) = self.title_markers.iter().find(|m| title.contains(m.as_str())) {
            return Verdict::Blocked {
                reason: format!("title matched \"{marker}\""),
            };
        }

        if !self.body_markers.is_empty() {
            let body = page.html.to_lowercase();
            if let Some(marker) = self.body_markers.iter().find(|m| body.contains(m.as_str())) {
                return Verdict::Blocked {
                    reason: format!("body matched \"{marker}\""),
                };
            }
        }

        Verdict::Clear
    }
}

/// Linear backoff: `min(base + retry * increment, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub increment: Duration,
    pub max_wait: Duration,
    pub max_retries: u32,
}

impl BackoffPolicy {
    #[must_use]
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base_wait_secs),
            increment: Duration::from_secs(config.increment_secs),
            max_wait: Duration::from_secs(config.max_wait_secs),
            max_retries: config.max_retries,
        }
    }

    /// Wait before retry number `retry_count + 1`.
    #[must_use]
    pub fn wait_for(&self, retry_count: u32) -> Duration {
        let wait = self.base.saturating_add(self.increment.saturating_mul(retry_count));
        wait.min(self.max_wait)
    }
}

/// What the session should do after a detection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Sleep for `wait`, then retry; `retry_count` is the new count
    Wait { wait: Duration, retry_count: u32 },
    /// Retries used up; the session must stop
    Exhausted,
}

/// Per-session retry counter driven by [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    retry_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn on_detection(&mut self) -> BackoffDecision {
        if self.retry_count >= self.policy.max_retries {
            return BackoffDecision::Exhausted;
        }
        let wait = self.policy.wait_for(self.retry_count);
        self.retry_count += 1;
        BackoffDecision::Wait {
            wait,
            retry_count: self.retry_count,
        }
    }

    /// A clean page resets the counter.
    pub fn on_clear(&mut self) {
        self.retry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, title: &str, html: &str) -> LoadedPage {
        LoadedPage {
            url: url.to_string(),
            title: title.to_string(),
            html: html.to_string(),
        }
    }

    fn config() -> DetectionConfig {
        DetectionConfig {
            url_markers: vec!["/splashui/captcha".to_string()],
            title_markers: vec!["Security Measure".to_string()],
            body_markers: vec!["verify you are a human".to_string()],
            base_wait_secs: 30,
            increment_secs: 30,
            max_wait_secs: 300,
            max_retries: 3,
        }
    }

    #[test]
    fn test_clear_page() {
        let monitor = DetectionMonitor::new(&config());
        let verdict = monitor.inspect(&page(
            "https://www.example.com/sch/i.html?_nkw=lens",
            "lens | Example",
            "<html><body>results</body></html>",
        ));
        assert_eq!(verdict, Verdict::Clear);
    }

    #[test]
    fn test_markers_match_case_insensitively() {
        let monitor = DetectionMonitor::new(&config());

        let by_url = monitor.inspect(&page(
            "https://www.example.com/splashui/CAPTCHA?ap=1",
            "",
            "",
        ));
        assert!(matches!(by_url, Verdict::Blocked { .. }));

        let by_title = monitor.inspect(&page("https://x.test/", "SECURITY MEASURE", ""));
        assert!(matches!(by_title, Verdict::Blocked { .. }));

        let by_body = monitor.inspect(&page(
            "https://x.test/",
            "Hi",
            "<p>Please Verify You Are A Human</p>",
        ));
        assert!(matches!(by_body, Verdict::Blocked { reason } if reason.contains("body")));
    }

    #[test]
    fn test_first_wait_is_base_and_waits_never_decrease() {
        let policy = BackoffPolicy::from_config(&config());
        assert_eq!(policy.wait_for(0), Duration::from_secs(30));

        let waits: Vec<Duration> = (0..20).map(|n| policy.wait_for(n)).collect();
        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*waits.last().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_state_exhausts_after_max_retries() {
        let mut state = BackoffState::new(BackoffPolicy::from_config(&config()));

        assert_eq!(
            state.on_detection(),
            BackoffDecision::Wait { wait: Duration::from_secs(30), retry_count: 1 }
        );
        assert_eq!(
            state.on_detection(),
            BackoffDecision::Wait { wait: Duration::from_secs(60), retry_count: 2 }
        );
        assert_eq!(
            state.on_detection(),
            BackoffDecision::Wait { wait: Duration::from_secs(90), retry_count: 3 }
        );
        assert_eq!(state.on_detection(), BackoffDecision::Exhausted);
    }

    #[test]
    fn test_clear_resets_counter() {
        let mut state = BackoffState::new(BackoffPolicy::from_config(&config()));
        state.on_detection();
        state.on_detection();
        state.on_clear();
        assert_eq!(state.retry_count(), 0);
        assert!(matches!(
            state.on_detection(),
            BackoffDecision::Wait { retry_count: 1, .. }
        ));
    }
}
