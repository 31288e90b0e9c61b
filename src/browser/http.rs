use async_trait::async_trait;
use log2::debug;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

use super::chrome::DEFAULT_USER_AGENT;
use crate::scraper::{BrowserSession, PageElement, SessionError, SessionFactory};

/// Default timeout for page requests in seconds
pub const PAGE_REQUEST_TIMEOUT_SEC: u64 = 10;

/// Sessions over plain HTTP: no JavaScript, the DOM is the served HTML.
#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for HttpSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSessionFactory {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(PAGE_REQUEST_TIMEOUT_SEC),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    type Session = HttpSession;

    async fn open(&self) -> Result<HttpSession, SessionError> {
        let client = Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        Ok(HttpSession {
            inner: Arc::new(HttpInner {
                client,
                page: RwLock::new(None),
            }),
        })
    }
}

struct LoadedPage {
    url: Url,
    html: String,
}

struct HttpInner {
    client: Client,
    page: RwLock<Option<LoadedPage>>,
}

impl HttpInner {
    async fn load(&self, url: &str) -> Result<(), SessionError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let final_url = response.url().clone();
        let html = response.text().await?;
        debug!("Loaded {} ({} bytes)", final_url, html.len());
        *self.page.write().await = Some(LoadedPage { url: final_url, html });
        Ok(())
    }
}

pub struct HttpSession {
    inner: Arc<HttpInner>,
}

/// Snapshot of an element taken when it was looked up.
pub struct HttpElement {
    attributes: HashMap<String, String>,
    /// `href` resolved against the page URL
    target: Option<Url>,
    text: String,
    inner: Arc<HttpInner>,
}

impl HttpElement {
    fn capture(element: ElementRef<'_>, base: &Url, inner: &Arc<HttpInner>) -> Self {
        let attributes: HashMap<String, String> = element
            .value()
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let target = attributes.get("href").and_then(|href| base.join(href).ok());
        let text = element.text().collect::<String>().trim().to_string();

        Self {
            attributes,
            target,
            text,
            inner: Arc::clone(inner),
        }
    }
}

#[async_trait]
impl PageElement for HttpElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>, SessionError> {
        if name == "href" {
            return Ok(self.target.as_ref().map(|url| url.to_string()));
        }
        Ok(self.attributes.get(name).cloned())
    }

    async fn text(&self) -> Result<Option<String>, SessionError> {
        Ok(Some(self.text.clone()).filter(|t| !t.is_empty()))
    }

    /// Follows the element's link.
    async fn click(&self) -> Result<(), SessionError> {
        match &self.target {
            Some(url) => self.inner.load(url.as_str()).await,
            None => Err(SessionError::NotInteractable("element has no link target".to_string())),
        }
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    type Element = HttpElement;

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.inner.load(url).await
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<HttpElement>, SessionError> {
        let page = self.inner.page.read().await;
        let Some(page) = page.as_ref() else {
            return Ok(Vec::new());
        };

        let selector = Selector::parse(selector)
            .map_err(|e| SessionError::InvalidSelector(format!("{}: {}", selector, e)))?;
        let document = Html::parse_document(&page.html);
        let elements = document
            .select(&selector)
            .map(|element| HttpElement::capture(element, &page.url, &self.inner))
            .collect();
        Ok(elements)
    }

    /// A served document never changes, so there is nothing to wait for.
    async fn find_one(&self, selector: &str, _timeout: Duration) -> Result<HttpElement, SessionError> {
        self.find_all(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::Timeout {
                selector: selector.to_string(),
            })
    }

    async fn current_url(&self) -> Result<Option<String>, SessionError> {
        Ok(self.inner.page.read().await.as_ref().map(|page| page.url.to_string()))
    }

    async fn quit(self) -> Result<(), SessionError> {
        Ok(())
    }
}
