//! Launch and own the single long-running Chromium instance.

use std::time::Duration;

use {
    chromiumoxide::{Browser, browser::BrowserConfig as CdpBrowserConfig},
    futures::StreamExt,
    tokio::{sync::RwLock, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{error::BrowserError, types::Viewport};

/// Settings for the browser process.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub default_viewport: Viewport,
    pub request_timeout: Duration,
    pub extra_args: Vec<String>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            default_viewport: Viewport::default(),
            request_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

/// The running browser plus its CDP event pump. Drive calls take the read
/// lock; closing takes the write lock, so shutdown waits for in-flight work.
pub struct BrowserHandle {
    browser: RwLock<Option<Browser>>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BrowserHandle {
    /// Launch Chromium with the given settings. Fails with an install hint
    /// when no Chromium-family binary is present.
    pub async fn launch(settings: &LaunchSettings) -> Result<Self, BrowserError> {
        let detection = crate::detect::detect_browser(settings.chrome_path.as_deref());
        if !detection.found {
            return Err(BrowserError::LaunchFailed(format!(
                "Chrome/Chromium not found. {}",
                detection.install_hint
            )));
        }

        let mut builder = CdpBrowserConfig::builder();

        // chromiumoxide runs headless by default; with_head() shows the window.
        if !settings.headless {
            builder = builder.with_head();
        }

        builder = builder
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: settings.default_viewport.width,
                height: settings.default_viewport.height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .request_timeout(settings.request_timeout);

        if let Some(path) = detection.path {
            builder = builder.chrome_executable(path);
        }

        for arg in &settings.extra_args {
            builder = builder.arg(arg);
        }

        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        let config = builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            let install_hint = crate::detect::install_instructions();
            BrowserError::LaunchFailed(format!("browser launch failed: {e}\n\n{install_hint}"))
        })?;

        // Pump CDP events; the stream ends when the connection closes.
        let pump = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser event");
            }
            debug!("browser event pump exited");
        });

        info!(
            headless = settings.headless,
            viewport_width = settings.default_viewport.width,
            viewport_height = settings.default_viewport.height,
            "browser launched"
        );

        Ok(Self {
            browser: RwLock::new(Some(browser)),
            handler: std::sync::Mutex::new(Some(pump)),
        })
    }

    /// Run a closure against the live browser.
    pub async fn with_browser<T>(
        &self,
        f: impl AsyncFnOnce(&Browser) -> Result<T, BrowserError>,
    ) -> Result<T, BrowserError> {
        let guard = self.browser.read().await;
        match guard.as_ref() {
            Some(browser) => f(browser).await,
            None => Err(BrowserError::Cdp("browser is closed".into())),
        }
    }

    /// Close the browser and stop the event pump.
    pub async fn close(&self) {
        let mut guard = self.browser.write().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "failed to close browser cleanly");
            }
            let _ = browser.wait().await;
        }
        if let Some(handle) = self
            .handler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        info!("browser closed");
    }
}
