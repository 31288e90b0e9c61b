use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use log2::{debug, info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::scraper::{BrowserSession, PageElement, SessionError, SessionFactory};

/// Interval between DOM lookups while waiting for an element
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Launches (or attaches to) Chrome through the DevTools protocol.
#[derive(Debug, Clone)]
pub struct ChromeSessionFactory {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    /// DevTools websocket URL of an already running browser
    pub remote_url: Option<String>,
    pub user_agent: String,
    pub window_size: (u32, u32),
    pub request_timeout: Duration,
}

impl Default for ChromeSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChromeSessionFactory {
    pub fn new() -> Self {
        Self {
            headless: false,
            chrome_executable: None,
            remote_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_size: (800, 600),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_chrome_executable(mut self, path: Option<PathBuf>) -> Self {
        self.chrome_executable = path;
        self
    }

    pub fn with_remote_url(mut self, url: Option<String>) -> Self {
        self.remote_url = url;
        self
    }

    fn browser_config(&self) -> Result<BrowserConfig, SessionError> {
        let (width, height) = self.window_size;
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(width, height)
            .request_timeout(self.request_timeout)
            .arg("--window-position=0,0")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(SessionError::Launch)
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    type Session = ChromeSession;

    async fn open(&self) -> Result<ChromeSession, SessionError> {
        let owned = self.remote_url.is_none();
        let (browser, mut handler) = match &self.remote_url {
            Some(url) => {
                info!("Connecting to remote Chrome instance at {}", url);
                Browser::connect(url.as_str())
                    .await
                    .map_err(|e| SessionError::Launch(format!("Failed to connect to remote Chrome: {}", e)))?
            }
            None => Browser::launch(self.browser_config()?)
                .await
                .map_err(|e| SessionError::Launch(e.to_string()))?,
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(SessionError::Launch(format!("Failed to open a tab: {}", e)));
            }
        };
        if let Err(e) = page.set_user_agent(self.user_agent.as_str()).await {
            warn!("Failed to set user agent: {}", e);
        }

        Ok(ChromeSession {
            browser,
            page,
            handler_task,
            owned,
        })
    }
}

/// One Chrome tab driven by a scrape run.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    /// Whether the browser process was started by us
    owned: bool,
}

/// Sorts a failed lookup: `Ok` when the node is just not in the DOM (yet),
/// `Err` when the browser itself failed.
fn lookup_failure(err: CdpError) -> Result<CdpError, SessionError> {
    match err {
        CdpError::Chrome(_) | CdpError::NotFound => Ok(err),
        other => Err(SessionError::Protocol(other.to_string())),
    }
}

pub struct ChromeElement(Element);

#[async_trait]
impl PageElement for ChromeElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>, SessionError> {
        // the DOM property holds the absolute URL, the attribute may be relative
        if name == "href" {
            let value = self
                .0
                .property("href")
                .await
                .map_err(|e| SessionError::Protocol(e.to_string()))?;
            if let Some(href) = value.as_ref().and_then(|v| v.as_str()) {
                return Ok(Some(href.to_string()));
            }
        }
        self.0
            .attribute(name)
            .await
            .map_err(|e| SessionError::Protocol(e.to_string()))
    }

    async fn text(&self) -> Result<Option<String>, SessionError> {
        self.0
            .inner_text()
            .await
            .map_err(|e| SessionError::Protocol(e.to_string()))
    }

    async fn click(&self) -> Result<(), SessionError> {
        self.0
            .click()
            .await
            .map(|_| ())
            .map_err(|e| SessionError::NotInteractable(e.to_string()))
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    type Element = ChromeElement;

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<ChromeElement>, SessionError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(elements.into_iter().map(ChromeElement).collect())
    }

    async fn find_one(&self, selector: &str, timeout: Duration) -> Result<ChromeElement, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(ChromeElement(element)),
                Err(e) => {
                    let e = lookup_failure(e)?;
                    if Instant::now() >= deadline {
                        debug!("`{}` not found: {}", selector, e);
                        return Err(SessionError::Timeout {
                            selector: selector.to_string(),
                        });
                    }
                }
            }
            sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    async fn current_url(&self) -> Result<Option<String>, SessionError> {
        self.page.url().await.map_err(|e| SessionError::Protocol(e.to_string()))
    }

    async fn quit(self) -> Result<(), SessionError> {
        let ChromeSession {
            mut browser,
            page,
            handler_task,
            owned,
        } = self;

        let result = if owned {
            match browser.close().await {
                Ok(_) => {
                    let _ = browser.wait().await;
                    Ok(())
                }
                Err(e) => Err(SessionError::Protocol(e.to_string())),
            }
        } else {
            // leave a shared remote browser running, only drop our tab
            page.close().await.map_err(|e| SessionError::Protocol(e.to_string()))
        };

        handler_task.abort();
        result
    }
}
