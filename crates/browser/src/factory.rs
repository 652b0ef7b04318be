//! Context creation behind a trait seam.
//!
//! Each pooled context is a dedicated CDP browser context (own cookies and
//! storage) with one primary page. The trait keeps the pool and the session
//! manager testable without a live browser.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chromiumoxide::{
        Page,
        cdp::browser_protocol::{
            browser::BrowserContextId,
            emulation::{SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams},
            network::ClearBrowserCookiesParams,
            target::{
                CloseTargetParams, CreateBrowserContextParams, CreateTargetParams,
                DisposeBrowserContextParams, GetTargetsParams,
            },
        },
    },
    tracing::{debug, warn},
};

use crate::{error::BrowserError, launcher::BrowserHandle, types::ContextFingerprint};

/// A live (or, in tests, detached) browsing context.
pub struct ContextHandle {
    /// CDP browser context id; `None` for detached test handles.
    pub context_id: Option<BrowserContextId>,
    /// The context's primary page; `None` for detached test handles.
    pub page: Option<Page>,
}

impl ContextHandle {
    /// A handle with no live driver objects, for tests and dry wiring.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            context_id: None,
            page: None,
        }
    }

    /// The primary page, or a crash-class error when the handle is detached.
    pub fn page(&self) -> Result<&Page, BrowserError> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Cdp("context has no live page".into()))
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("context_id", &self.context_id)
            .field("live", &self.page.is_some())
            .finish()
    }
}

/// Creates, resets, and destroys browsing contexts.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn create(&self, fingerprint: &ContextFingerprint) -> Result<ContextHandle, BrowserError>;

    /// Restore a context to a clean state: close extra pages, blank the
    /// primary page, clear cookies, best-effort clear web storage. Any
    /// failure means the caller must destroy the context instead.
    async fn reset(&self, handle: &ContextHandle) -> Result<(), BrowserError>;

    async fn destroy(&self, handle: ContextHandle);
}

/// The real factory, driving the shared browser over CDP.
pub struct ChromiumFactory {
    handle: Arc<BrowserHandle>,
}

impl ChromiumFactory {
    #[must_use]
    pub fn new(handle: Arc<BrowserHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl ContextFactory for ChromiumFactory {
    async fn create(&self, fingerprint: &ContextFingerprint) -> Result<ContextHandle, BrowserError> {
        let (context_id, page) = self
            .handle
            .with_browser(async |browser| {
                let created = browser
                    .execute(CreateBrowserContextParams::default())
                    .await
                    .map_err(|e| BrowserError::ContextCreateFailed(e.to_string()))?;
                let context_id = created.result.browser_context_id.clone();

                let target = CreateTargetParams::builder()
                    .url("about:blank")
                    .browser_context_id(context_id.clone())
                    .build()
                    .map_err(BrowserError::ContextCreateFailed)?;
                let page = browser
                    .new_page(target)
                    .await
                    .map_err(|e| BrowserError::ContextCreateFailed(e.to_string()))?;

                Ok((context_id, page))
            })
            .await?;

        apply_fingerprint(&page, fingerprint).await?;

        debug!(?context_id, fingerprint = %fingerprint, "created browser context");
        Ok(ContextHandle {
            context_id: Some(context_id),
            page: Some(page),
        })
    }

    async fn reset(&self, handle: &ContextHandle) -> Result<(), BrowserError> {
        let page = handle.page()?;
        let Some(ref context_id) = handle.context_id else {
            return Err(BrowserError::ResetFailed("context has no id".into()));
        };

        // Close every page in this context except the primary one.
        let primary = page.target_id().clone();
        let context_id = context_id.clone();
        self.handle
            .with_browser(async |browser| {
                let targets = browser
                    .execute(GetTargetsParams::default())
                    .await
                    .map_err(|e| BrowserError::ResetFailed(e.to_string()))?;
                for info in &targets.result.target_infos {
                    if info.browser_context_id.as_ref() == Some(&context_id)
                        && info.r#type == "page"
                        && info.target_id != primary
                    {
                        browser
                            .execute(CloseTargetParams::new(info.target_id.clone()))
                            .await
                            .map_err(|e| BrowserError::ResetFailed(e.to_string()))?;
                    }
                }
                Ok(())
            })
            .await?;

        page.goto("about:blank")
            .await
            .map_err(|e| BrowserError::ResetFailed(e.to_string()))?;

        page.execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|e| BrowserError::ResetFailed(e.to_string()))?;

        // Storage clearing is best effort: about:blank denies storage access
        // in some Chromium builds.
        let _ = page
            .evaluate("try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}")
            .await;

        Ok(())
    }

    async fn destroy(&self, handle: ContextHandle) {
        if let Some(page) = handle.page {
            if let Err(e) = page.close().await {
                debug!(error = %e, "page close during context destroy failed");
            }
        }
        if let Some(context_id) = handle.context_id {
            let result = self
                .handle
                .with_browser(async |browser| {
                    browser
                        .execute(DisposeBrowserContextParams::new(context_id.clone()))
                        .await
                        .map_err(|e| BrowserError::Cdp(e.to_string()))?;
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to dispose browser context");
            }
        }
    }
}

/// Apply viewport and user agent to a fresh page.
async fn apply_fingerprint(
    page: &Page,
    fingerprint: &ContextFingerprint,
) -> Result<(), BrowserError> {
    let viewport = SetDeviceMetricsOverrideParams::builder()
        .width(fingerprint.viewport.width)
        .height(fingerprint.viewport.height)
        .device_scale_factor(1.0)
        .mobile(false)
        .build()
        .map_err(BrowserError::ContextCreateFailed)?;
    page.execute(viewport)
        .await
        .map_err(|e| BrowserError::ContextCreateFailed(e.to_string()))?;

    if let Some(ref ua) = fingerprint.user_agent {
        page.execute(SetUserAgentOverrideParams::new(ua.clone()))
            .await
            .map_err(|e| BrowserError::ContextCreateFailed(e.to_string()))?;
    }

    Ok(())
}
