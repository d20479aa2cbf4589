use anyhow::{Context, Result};
use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig},
};
use futures::StreamExt;
use tokio::{sync::RwLock, task::JoinHandle};

use crate::cnfg::BrowserLifecycle;
use crate::error::PdfError;

/// A browser plus the task draining its CDP event stream.
struct BrowserHandle {
    browser: Browser,
    event_task: JoinHandle<()>,
}

/// Owns the headless browser(s) behind the render endpoint.
///
/// With the shared lifecycle, one browser is launched up front and every
/// request opens a tab on it; the handle is read-shared for tab creation and
/// only taken exclusively at shutdown. With the per-request lifecycle, the
/// pool stays empty and each session launches (and later tears down) its own
/// browser.
pub struct BrowserPool {
    lifecycle: BrowserLifecycle,
    shared: RwLock<Option<BrowserHandle>>,
}

impl BrowserPool {
    pub async fn launch(lifecycle: BrowserLifecycle) -> Self {
        let shared = match lifecycle {
            BrowserLifecycle::Shared => match launch_browser().await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    // The service stays up to answer health checks; renders
                    // report "Browser not ready" until an operator restarts.
                    tracing::error!("failed to launch shared browser: {err:#}");
                    None
                }
            },
            BrowserLifecycle::PerRequest => None,
        };

        BrowserPool {
            lifecycle,
            shared: RwLock::new(shared),
        }
    }

    /// A pool with no browser at all. Renders answer "Browser not ready".
    pub fn empty() -> Self {
        BrowserPool {
            lifecycle: BrowserLifecycle::Shared,
            shared: RwLock::new(None),
        }
    }

    pub async fn is_ready(&self) -> bool {
        match self.lifecycle {
            BrowserLifecycle::Shared => self.shared.read().await.is_some(),
            BrowserLifecycle::PerRequest => true,
        }
    }

    /// Opens a fresh tab for one request. The caller must close the returned
    /// session on every exit path.
    pub async fn open_session(&self) -> Result<RenderSession, PdfError> {
        match self.lifecycle {
            BrowserLifecycle::Shared => {
                let guard = self.shared.read().await;
                let handle = guard.as_ref().ok_or(PdfError::BrowserNotReady)?;
                let page = handle.browser.new_page("about:blank").await?;
                Ok(RenderSession { page, owned: None })
            }
            BrowserLifecycle::PerRequest => {
                let handle = launch_browser().await?;
                let page = handle.browser.new_page("about:blank").await?;
                Ok(RenderSession {
                    page,
                    owned: Some(handle),
                })
            }
        }
    }

    /// Tears down the shared browser. Called once after the server loop exits.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.shared.write().await.take() {
            handle.close().await;
            tracing::info!("shared browser closed");
        }
    }
}

/// One request's exclusively-owned tab (plus its own browser under the
/// per-request lifecycle). Not droppable implicitly: call [`close`].
///
/// [`close`]: RenderSession::close
pub struct RenderSession {
    page: Page,
    owned: Option<BrowserHandle>,
}

impl RenderSession {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Closes the tab, and the per-request browser if this session owns one.
    /// Errors here are logged and swallowed: the response is already decided
    /// by the time cleanup runs.
    pub async fn close(self) {
        if let Err(err) = self.page.close().await {
            tracing::warn!("failed to close page: {err}");
        }
        if let Some(handle) = self.owned {
            handle.close().await;
        }
    }
}

impl BrowserHandle {
    async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            tracing::warn!("failed to close browser: {err}");
        }
        let _ = self.browser.wait().await;
        self.event_task.abort();
    }
}

async fn launch_browser() -> Result<BrowserHandle> {
    let config = BrowserConfig::builder()
        .viewport(None)
        .no_sandbox()
        .args(["--disable-setuid-sandbox", "--disable-dev-shm-usage", "--disable-gpu"])
        .build()
        .map_err(|e| anyhow::anyhow!("browser config error: {e}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("launching headless browser")?;

    // Spawn handler properly - this is crucial for chromiumoxide to work
    // Don't break on errors as some WebSocket deserialization errors are normal
    let event_task = tokio::task::spawn(async move {
        while let Some(_) = handler.next().await {
            // Continue processing regardless of errors
            // WebSocket deserialization errors are common and shouldn't stop the handler
        }
    });

    Ok(BrowserHandle {
        browser,
        event_task,
    })
}
