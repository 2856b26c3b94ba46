//! Configuration management for Sift.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
///
/// This is loaded from `~/.config/sift/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Admission and snapshot settings
    pub scheduler: SchedulerConfig,
    /// Page loop settings
    pub session: SessionConfig,
    /// Block detection and backoff policy
    pub detection: DetectionConfig,
    /// Detail enrichment pass settings
    pub enrichment: EnrichmentConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Target site locator templates
    pub site: SiteConfig,
    /// Selectors for the bundled extractor
    pub extractor: ExtractorConfig,
    /// Export writer settings
    pub export: ExportConfig,
    /// Progress channel endpoint
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `SIFT_MAX_CONCURRENCY`: Override scheduler concurrency cap
    /// - `SIFT_HEADLESS`: Override browser headless mode (true/false)
    /// - `SIFT_OUTPUT_DIR`: Override export directory
    /// - `SIFT_PORT`: Override progress channel port
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SIFT_MAX_CONCURRENCY") {
            if let Ok(max) = val.parse::<usize>() {
                if max > 0 {
                    self.scheduler.max_concurrency = max;
                    tracing::debug!("Override scheduler.max_concurrency from env: {}", max);
                }
            }
        }

        if let Ok(val) = std::env::var("SIFT_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("SIFT_OUTPUT_DIR") {
            if !val.is_empty() {
                tracing::debug!("Override export.output_dir from env: {}", val);
                self.export.output_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("SIFT_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
                tracing::debug!("Override server.port from env: {}", port);
            }
        }

        self
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let dir = path.parent().ok_or_else(|| ConfigError::InvalidValue {
            field: "config_path".to_string(),
            reason: "no parent directory".to_string(),
        })?;

        fs::create_dir_all(dir)?;
        tracing::debug!("Saving config to {}", path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.max_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.session.acquire_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.acquire_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.session.page_delay_min_ms > self.session.page_delay_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "session.page_delay_min_ms".to_string(),
                reason: "must not exceed page_delay_max_ms".to_string(),
            });
        }
        if self.enrichment.delay_min_ms > self.enrichment.delay_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "enrichment.delay_min_ms".to_string(),
                reason: "must not exceed delay_max_ms".to_string(),
            });
        }
        if self.detection.base_wait_secs > self.detection.max_wait_secs {
            return Err(ConfigError::InvalidValue {
                field: "detection.base_wait_secs".to_string(),
                reason: "must not exceed max_wait_secs".to_string(),
            });
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/sift/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "sift", "sift").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/sift`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "sift", "sift").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Export directory, defaulting to `<data_dir>/exports`.
    pub fn output_dir(&self) -> ConfigResult<PathBuf> {
        match &self.export.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("exports")),
        }
    }

    /// Snapshot file, defaulting to `<data_dir>/tasks.json`.
    pub fn snapshot_path(&self) -> ConfigResult<PathBuf> {
        match &self.scheduler.snapshot_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("tasks.json")),
        }
    }
}

/// Admission and snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sessions allowed to run at once; each holds one browser
    pub max_concurrency: usize,
    /// Seconds between snapshot file writes (0 disables)
    pub snapshot_interval_secs: u64,
    /// Snapshot file location
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            snapshot_interval_secs: 30,
            snapshot_path: None,
        }
    }
}

/// Page loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Attempts to acquire an execution environment
    pub acquire_attempts: u32,
    /// Fixed delay between acquisition attempts
    pub acquire_delay_ms: u64,
    /// Delay before the single navigation retry
    pub navigation_retry_delay_ms: u64,
    /// Lower bound of the randomized inter-page delay
    pub page_delay_min_ms: u64,
    /// Upper bound of the randomized inter-page delay
    pub page_delay_max_ms: u64,
    /// Consecutive empty pages that end the loop
    pub empty_page_threshold: u32,
    /// Pages to visit when the target exposes no result count
    pub fallback_page_budget: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: 3,
            acquire_delay_ms: 2000,
            navigation_retry_delay_ms: 1500,
            page_delay_min_ms: 1500,
            page_delay_max_ms: 4000,
            empty_page_threshold: 3,
            fallback_page_budget: 10,
        }
    }
}

/// Block detection markers and backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Substrings of the final URL that mark an interstitial
    pub url_markers: Vec<String>,
    /// Substrings of the page title that mark an interstitial (case-insensitive)
    pub title_markers: Vec<String>,
    /// Substrings of the page body that mark an interstitial (case-insensitive)
    pub body_markers: Vec<String>,
    /// First backoff window
    pub base_wait_secs: u64,
    /// Added per consecutive detection
    pub increment_secs: u64,
    /// Cap on the backoff window
    pub max_wait_secs: u64,
    /// Consecutive detections tolerated before the task is stopped
    pub max_retries: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            url_markers: vec!["/splashui/challenge".to_string(), "/captcha".to_string()],
            title_markers: vec![
                "pardon our interruption".to_string(),
                "security measure".to_string(),
                "access denied".to_string(),
            ],
            body_markers: vec!["g-recaptcha".to_string(), "px-captcha".to_string()],
            base_wait_secs: 30,
            increment_secs: 30,
            max_wait_secs: 300,
            max_retries: 1,
        }
    }
}

/// Detail enrichment pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Lower bound of the randomized delay between detail visits
    pub delay_min_ms: u64,
    /// Upper bound of the randomized delay between detail visits
    pub delay_max_ms: u64,
    /// Emit `detail_progress` every this many records
    pub progress_every: usize,
    /// Consecutive failures that abandon the rest of the pass (0 = never)
    pub max_consecutive_failures: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            delay_min_ms: 800,
            delay_max_ms: 2500,
            progress_every: 5,
            max_consecutive_failures: 5,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Explicit Chrome/Chromium executable
    pub executable: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 30,
            executable: None,
        }
    }
}

/// How page locators are built for the target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Search URL with `{query}`, `{page}` and `{page_size}` placeholders
    pub search_template: String,
    /// Page query parameter for locator targets
    pub page_param: String,
    /// Page-size query parameter for locator targets
    pub page_size_param: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            search_template:
                "https://www.example.com/sch/i.html?_nkw={query}&_pgn={page}&_ipg={page_size}"
                    .to_string(),
            page_param: "_pgn".to_string(),
            page_size_param: "_ipg".to_string(),
        }
    }
}

/// CSS selectors for the bundled selector extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// One match per listing on a results page
    pub item: String,
    /// Attribute on the item element carrying the natural key
    pub id_attribute: String,
    /// Listing title (relative to item)
    pub title: String,
    /// Price (relative to item)
    pub price: Option<String>,
    /// Image elements (relative to item); `src` or `data-src` is read
    pub image: Option<String>,
    /// Condition (relative to item)
    pub condition: Option<String>,
    /// Shipping note (relative to item)
    pub shipping: Option<String>,
    /// Anchor whose `href` is the detail locator (relative to item)
    pub link: String,
    /// Secondary fields read from the results page (field -> selector)
    pub listing_fields: BTreeMap<String, String>,
    /// Element whose text contains the total result count
    pub total_count: Option<String>,
    /// Element present only when no further results exist
    pub end_of_results: Option<String>,
    /// Secondary fields read from detail pages (field -> selector)
    pub detail_fields: BTreeMap<String, String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let mut detail_fields = BTreeMap::new();
        detail_fields.insert("seller".to_string(), ".seller-name".to_string());
        detail_fields.insert("location".to_string(), ".item-location".to_string());

        Self {
            item: "li.s-item".to_string(),
            id_attribute: "data-listing-id".to_string(),
            title: ".s-item__title".to_string(),
            price: Some(".s-item__price".to_string()),
            image: Some(".s-item__image img".to_string()),
            condition: Some(".SECONDARY_INFO".to_string()),
            shipping: Some(".s-item__shipping".to_string()),
            link: "a.s-item__link".to_string(),
            listing_fields: BTreeMap::new(),
            total_count: Some(".srp-controls__count-heading".to_string()),
            end_of_results: None,
            detail_fields,
        }
    }
}

/// Export writer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory export artifacts are written to
    pub output_dir: Option<PathBuf>,
}

/// Progress channel endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}
