//! Scripted in-memory browser used by the unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::config::ScraperConfig;
use super::error::SessionError;
use super::session::{BrowserSession, PageElement, SessionFactory};
use super::state::CancelFlag;

/// A link as the fake page exposes it.
#[derive(Debug, Clone)]
pub enum FakeLink {
    Href(String),
    /// Anchor without an href
    Missing,
    /// Reading the href fails
    Broken,
}

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub links: Vec<FakeLink>,
    pub has_results: bool,
    pub has_next: bool,
    /// Number of CAPTCHA probes on this page that still see a challenge
    pub captcha_probes: usize,
}

impl FakePage {
    pub fn with_links(links: &[&str]) -> Self {
        Self {
            links: links.iter().map(|l| FakeLink::Href(l.to_string())).collect(),
            has_results: true,
            has_next: false,
            captcha_probes: 0,
        }
    }

    pub fn next(mut self) -> Self {
        self.has_next = true;
        self
    }

    pub fn captcha(mut self, probes: usize) -> Self {
        self.captcha_probes = probes;
        self
    }

    pub fn no_results(mut self) -> Self {
        self.has_results = false;
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeStats {
    pub opens: AtomicUsize,
    pub navigations: AtomicUsize,
    pub pages_read: AtomicUsize,
    pub captcha_probes: AtomicUsize,
    pub clicks: AtomicUsize,
    pub quits: AtomicUsize,
}

impl FakeStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct Shared {
    pages: Vec<FakePage>,
    current: Mutex<usize>,
    remaining_captcha: Mutex<Vec<usize>>,
    results_selector: String,
    captcha_selector: String,
    next_selector: String,
    fail_navigation: bool,
    fail_link_query: bool,
    fail_click: bool,
    fail_lookup_after: Option<usize>,
    cancel_on_probe: Option<(usize, CancelFlag)>,
    cancel_on_read: Option<(usize, CancelFlag)>,
    stats: Arc<FakeStats>,
}

/// Builds fake sessions that walk through a fixed list of pages. Clicking
/// "next" on the last page keeps the session on that page.
pub struct FakeFactory {
    shared: Arc<Shared>,
    failing_opens: AtomicUsize,
}

impl FakeFactory {
    pub fn new(pages: Vec<FakePage>, config: &ScraperConfig) -> Self {
        let remaining = pages.iter().map(|p| p.captcha_probes).collect();
        Self {
            shared: Arc::new(Shared {
                pages,
                current: Mutex::new(0),
                remaining_captcha: Mutex::new(remaining),
                results_selector: config.results_selector.clone(),
                captcha_selector: config.captcha_selector.clone(),
                next_selector: config.next_selector.clone(),
                fail_navigation: false,
                fail_link_query: false,
                fail_click: false,
                fail_lookup_after: None,
                cancel_on_probe: None,
                cancel_on_read: None,
                stats: Arc::new(FakeStats::default()),
            }),
            failing_opens: AtomicUsize::new(0),
        }
    }

    fn shared_mut(&mut self) -> &mut Shared {
        Arc::get_mut(&mut self.shared).expect("fake factory is configured before use")
    }

    /// The first `count` calls to `open` fail.
    pub fn failing_opens(self, count: usize) -> Self {
        self.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.shared_mut().fail_navigation = true;
        self
    }

    pub fn failing_link_query(mut self) -> Self {
        self.shared_mut().fail_link_query = true;
        self
    }

    pub fn failing_click(mut self) -> Self {
        self.shared_mut().fail_click = true;
        self
    }

    /// Every element lookup fails once `reads` pages have been read, like a
    /// browser that went away.
    pub fn failing_lookup_after(mut self, reads: usize) -> Self {
        self.shared_mut().fail_lookup_after = Some(reads);
        self
    }

    /// Cancels `flag` during the `probe`-th CAPTCHA probe.
    pub fn cancel_on_probe(mut self, probe: usize, flag: CancelFlag) -> Self {
        self.shared_mut().cancel_on_probe = Some((probe, flag));
        self
    }

    /// Cancels `flag` while the `read`-th page's links are being read.
    pub fn cancel_on_read(mut self, read: usize, flag: CancelFlag) -> Self {
        self.shared_mut().cancel_on_read = Some((read, flag));
        self
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.shared.stats)
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn open(&self) -> Result<FakeSession, SessionError> {
        self.shared.stats.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(SessionError::Launch("chrome not found".to_string()));
        }
        Ok(FakeSession {
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct FakeSession {
    shared: Arc<Shared>,
}

impl FakeSession {
    fn page(&self) -> (usize, FakePage) {
        let current = *self.shared.current.lock().unwrap();
        (current, self.shared.pages[current].clone())
    }
}

pub enum FakeElement {
    Marker,
    Link(FakeLink),
    Next(Arc<Shared>),
}

#[async_trait]
impl PageElement for FakeElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>, SessionError> {
        match (self, name) {
            (FakeElement::Link(FakeLink::Href(href)), "href") => Ok(Some(href.clone())),
            (FakeElement::Link(FakeLink::Broken), _) => {
                Err(SessionError::Protocol("stale element reference".to_string()))
            }
            _ => Ok(None),
        }
    }

    async fn text(&self) -> Result<Option<String>, SessionError> {
        match self {
            FakeElement::Next(_) => Ok(Some("Next".to_string())),
            _ => Ok(None),
        }
    }

    async fn click(&self) -> Result<(), SessionError> {
        let FakeElement::Next(shared) = self else {
            return Err(SessionError::NotInteractable("not a link".to_string()));
        };
        if shared.fail_click {
            return Err(SessionError::NotInteractable("next control is covered".to_string()));
        }
        shared.stats.clicks.fetch_add(1, Ordering::SeqCst);
        let mut current = shared.current.lock().unwrap();
        if *current + 1 < shared.pages.len() {
            *current += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    type Element = FakeElement;

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.shared.stats.navigations.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_navigation {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        *self.shared.current.lock().unwrap() = 0;
        Ok(())
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<FakeElement>, SessionError> {
        if selector != "a" {
            return Ok(Vec::new());
        }
        if self.shared.fail_link_query {
            return Err(SessionError::Protocol("browser crashed".to_string()));
        }
        let read = self.shared.stats.pages_read.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, flag)) = &self.shared.cancel_on_read {
            if *at == read {
                flag.cancel();
            }
        }

        let (_, page) = self.page();
        Ok(page.links.into_iter().map(FakeElement::Link).collect())
    }

    async fn find_one(&self, selector: &str, _timeout: Duration) -> Result<FakeElement, SessionError> {
        if let Some(after) = self.shared.fail_lookup_after {
            if FakeStats::get(&self.shared.stats.pages_read) >= after {
                return Err(SessionError::Protocol("websocket closed".to_string()));
            }
        }
        let (index, page) = self.page();
        let timeout = || SessionError::Timeout {
            selector: selector.to_string(),
        };

        if selector == self.shared.captcha_selector {
            let probe = self.shared.stats.captcha_probes.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, flag)) = &self.shared.cancel_on_probe {
                if *at == probe {
                    flag.cancel();
                }
            }
            let mut remaining = self.shared.remaining_captcha.lock().unwrap();
            if remaining[index] > 0 {
                remaining[index] = remaining[index].saturating_sub(1);
                return Ok(FakeElement::Marker);
            }
            return Err(timeout());
        }
        if selector == self.shared.results_selector {
            return if page.has_results { Ok(FakeElement::Marker) } else { Err(timeout()) };
        }
        if selector == self.shared.next_selector {
            return if page.has_next {
                Ok(FakeElement::Next(Arc::clone(&self.shared)))
            } else {
                Err(timeout())
            };
        }
        Err(SessionError::InvalidSelector(selector.to_string()))
    }

    async fn current_url(&self) -> Result<Option<String>, SessionError> {
        let (index, _) = self.page();
        Ok(Some(format!("https://search.test/page/{}", index + 1)))
    }

    async fn quit(self) -> Result<(), SessionError> {
        self.shared.stats.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Configuration with every wait shortened for tests.
pub fn fast_config() -> ScraperConfig {
    ScraperConfig::new()
        .with_page_delay(0, 0)
        .with_settle_delay(Duration::ZERO)
        .with_session_retries(3, Duration::from_millis(1))
        .with_element_timeout(Duration::from_millis(10))
        .with_captcha_policy(super::config::CaptchaPolicy::Poll {
            interval: Duration::from_millis(5),
        })
}
