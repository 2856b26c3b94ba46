use crate::environment::{extract_domain, Environment, EnvironmentLauncher, LoadedPage};
use crate::error::{BrowserError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use sift_core::BrowserConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Launches a headless Chromium per session.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: BrowserConfig,
}

impl BrowserLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl EnvironmentLauncher for BrowserLauncher {
    async fn launch(&self) -> Result<Box<dyn Environment>> {
        let engine = BrowserEngine::launch(&self.config).await?;
        Ok(Box::new(engine))
    }
}

/// One browser tab driven through CDP.
///
/// The engine returned by [`BrowserEngine::launch`] owns the browser process.
/// Engines returned by [`Environment::isolated`] own only their incognito
/// context and tab; closing them leaves the browser running.
pub struct BrowserEngine {
    browser: Arc<Mutex<Browser>>,
    page: Page,
    alive: Arc<AtomicBool>,
    handler: Option<JoinHandle<()>>,
    context_id: Option<BrowserContextId>,
    navigation_timeout: Duration,
}

impl BrowserEngine {
    /// Launch a browser process and open its main tab.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let mut builder = ChromeConfig::builder()
            .no_sandbox()
            .window_size(config.window_width, config.window_height);
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &config.executable {
            builder = builder.chrome_executable(executable);
        }
        let chrome_config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = alive.clone();

        // Spawn browser handler; the stream ends when the CDP connection drops
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler error: {}", e);
                }
            }
            alive_flag.store(false, Ordering::SeqCst);
            tracing::warn!("Browser connection closed");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        tracing::info!(headless = config.headless, "Browser environment launched");

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            page,
            alive,
            handler: Some(handler),
            context_id: None,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrowserError::Crashed("browser connection lost".to_string()))
        }
    }

    fn classify(&self, url: &str, err: &CdpError) -> BrowserError {
        if self.alive.load(Ordering::SeqCst) {
            BrowserError::NavigationError(format!("{url}: {err}"))
        } else {
            BrowserError::Crashed(err.to_string())
        }
    }

    async fn navigate(&self, url: &str) -> std::result::Result<LoadedPage, CdpError> {
        self.page.goto(url).await?;
        let html = self.page.content().await?;
        let title = self.page.get_title().await?.unwrap_or_default();
        let final_url = self.page.url().await?.unwrap_or_else(|| url.to_string());
        Ok(LoadedPage {
            url: final_url,
            title,
            html,
        })
    }
}

#[async_trait::async_trait]
impl Environment for BrowserEngine {
    async fn load(&self, url: &str) -> Result<LoadedPage> {
        self.ensure_alive()?;
        let domain = extract_domain(url)?;
        tracing::debug!(domain = %domain, "Navigating to {}", url);

        match tokio::time::timeout(self.navigation_timeout, self.navigate(url)).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => Err(self.classify(url, &e)),
            Err(_) => Err(BrowserError::Timeout(format!(
                "navigation to {url} exceeded {:?}",
                self.navigation_timeout
            ))),
        }
    }

    async fn isolated(&self) -> Result<Box<dyn Environment>> {
        self.ensure_alive()?;
        let mut browser = self.browser.lock().await;

        let context_id = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(BrowserError::ChromiumError)?;

        let page = browser
            .new_page(params)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        Ok(Box::new(Self {
            browser: self.browser.clone(),
            page,
            alive: self.alive.clone(),
            handler: None,
            context_id: Some(context_id),
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn close(&self) {
        if let Err(e) = self.page.clone().close().await {
            tracing::debug!("Failed to close page: {}", e);
        }

        let mut browser = self.browser.lock().await;

        if let Some(context_id) = &self.context_id {
            if let Err(e) = browser.dispose_browser_context(context_id.clone()).await {
                tracing::debug!("Failed to dispose browser context: {}", e);
            }
        }

        if let Some(handler) = &self.handler {
            if let Err(e) = browser.close().await {
                tracing::warn!("Failed to close browser: {}", e);
            }
            if let Err(e) = browser.wait().await {
                tracing::debug!("Failed to reap browser process: {}", e);
            }
            handler.abort();
        }
    }
}
