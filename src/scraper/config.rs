use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

/// Default search front-end
pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/search";
/// Domains under this suffix are dropped and excluded from the query
pub const DEFAULT_EXCLUDED_SUFFIX: &str = ".gov.ir";
/// Links pointing at this host (or its subdomains) are never collected
pub const DEFAULT_BLOCKED_HOST: &str = "translate.google.com";
/// Default maximum number of result pages visited per run
pub const DEFAULT_MAX_PAGES: usize = 30;
/// Default number of attempts to obtain a browser session
pub const DEFAULT_SESSION_RETRIES: usize = 3;

/// What to do while a CAPTCHA challenge is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaPolicy {
    /// Re-check the page every `interval` until the challenge is gone
    Poll { interval: Duration },
    /// Wait for an operator to solve it in the browser and press Enter
    Manual,
}

impl Default for CaptchaPolicy {
    fn default() -> Self {
        CaptchaPolicy::Poll {
            interval: Duration::from_secs(5),
        }
    }
}

/// Configuration for a scrape run
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub search_url: String,
    pub excluded_suffix: String,
    pub blocked_host: String,
    pub max_pages: usize,
    pub session_retries: usize,
    pub session_retry_delay: Duration,
    pub results_selector: String,
    pub results_timeout: Duration,
    pub captcha_selector: String,
    pub captcha_probe_timeout: Duration,
    pub next_selector: String,
    /// Fallback for the next control: any anchor whose text contains this
    pub next_text: String,
    pub next_timeout: Duration,
    /// Pause after clicking "next", picked uniformly from this range (ms)
    pub page_delay_ms: RangeInclusive<u64>,
    pub settle_delay: Duration,
    pub captcha_policy: CaptchaPolicy,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            excluded_suffix: DEFAULT_EXCLUDED_SUFFIX.to_string(),
            blocked_host: DEFAULT_BLOCKED_HOST.to_string(),
            max_pages: DEFAULT_MAX_PAGES,
            session_retries: DEFAULT_SESSION_RETRIES,
            session_retry_delay: Duration::from_secs(2),
            results_selector: "div.g".to_string(),
            results_timeout: Duration::from_secs(10),
            captcha_selector: r#"div#captcha, iframe[src*="recaptcha"]"#.to_string(),
            captcha_probe_timeout: Duration::from_secs(3),
            next_selector: "a#pnnext".to_string(),
            next_text: "Next".to_string(),
            next_timeout: Duration::from_secs(10),
            page_delay_ms: 3000..=5000,
            settle_delay: Duration::from_secs(2),
            captcha_policy: CaptchaPolicy::default(),
        }
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    pub fn with_excluded_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.excluded_suffix = suffix.into();
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_session_retries(mut self, retries: usize, delay: Duration) -> Self {
        self.session_retries = retries;
        self.session_retry_delay = delay;
        self
    }

    pub fn with_page_delay(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.page_delay_ms = min_ms.min(max_ms)..=max_ms.max(min_ms);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_captcha_policy(mut self, policy: CaptchaPolicy) -> Self {
        self.captcha_policy = policy;
        self
    }

    /// Sets every element wait (results, CAPTCHA probe, next control) at once.
    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.results_timeout = timeout;
        self.captcha_probe_timeout = timeout;
        self.next_timeout = timeout;
        self
    }
}

pub type ScraperConfigRef = Arc<ScraperConfig>;
