use log2::*;
use rand::Rng;
use std::sync::Arc;
use once_cell::sync::Lazy;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

use super::config::{CaptchaPolicy, ScraperConfig, ScraperConfigRef};
use super::error::{ScrapeError, SessionError};
use super::filter::{LinkFilter, SearchQuery};
use super::progress::{ProgressSink, ProgressUpdate};
use super::session::{BrowserSession, PageElement, SessionFactory, acquire_session};
use super::state::{CancelFlag, RunOutcome, RunState, ScrapeReport};

/// Poll interval used when an operator prompt cannot be read
const FALLBACK_CAPTCHA_POLL: Duration = Duration::from_secs(5);

/// One line reader over stdin for the whole process; a prompt abandoned on
/// cancel leaves its pending read here for the next prompt.
static OPERATOR_INPUT: Lazy<Mutex<Lines<BufReader<Stdin>>>> =
    Lazy::new(|| Mutex::new(BufReader::new(tokio::io::stdin()).lines()));

/// Runs one scrape for `tld` on a freshly acquired session.
///
/// The session is released on every exit path. Cancellation and running out
/// of pages return what was collected; any other failure discards it.
pub async fn scrape<F: SessionFactory + ?Sized>(
    factory: &F,
    tld: &str,
    config: &ScraperConfig,
    cancel: &CancelFlag,
    sink: Option<&dyn ProgressSink>,
) -> Result<ScrapeReport, ScrapeError> {
    let query = SearchQuery::new(tld, &config.excluded_suffix)?;
    let reporter = Reporter {
        sink,
        tld: query.tld().to_string(),
    };

    if cancel.is_cancelled() {
        info!("Scrape for {} cancelled before start", query.tld());
        reporter.send(reporter.update("Scraping cancelled by user", 0)).await;
        return Ok(ScrapeReport {
            tld: query.tld().to_string(),
            domains: Default::default(),
            pages_processed: 0,
            outcome: RunOutcome::Cancelled,
        });
    }

    let session = acquire_session(factory, config.session_retries, config.session_retry_delay).await?;
    let mut run = RunState::new(session, query, cancel.clone());

    let result = drive(&mut run, config, &reporter).await;

    let tld = run.query.tld().to_string();
    let (session, domains, pages_processed) = run.into_parts();
    if let Err(e) = session.quit().await {
        warn!("Failed to close browser session for {}: {}", tld, e);
    }

    match result {
        Ok(outcome) => {
            info!("Scrape for {} finished ({:?}): {} domains from {} pages", tld, outcome, domains.len(), pages_processed);
            let found = domains.len();
            reporter
                .send(
                    reporter
                        .update(format!("Completed scraping for {}. Found {} domains.", tld, found), found)
                        .with_progress(1.0),
                )
                .await;
            Ok(ScrapeReport {
                tld,
                domains,
                pages_processed,
                outcome,
            })
        }
        Err(e) => {
            error!("Scrape for {} failed: {}", tld, e);
            reporter.send(reporter.update(format!("Error: {}", e), 0).with_progress(0.0)).await;
            Err(e)
        }
    }
}

/// Pages through the results until the run ends one way or another.
async fn drive<S: BrowserSession>(
    run: &mut RunState<S>,
    config: &ScraperConfig,
    reporter: &Reporter<'_>,
) -> Result<RunOutcome, ScrapeError> {
    let url = run.query.search_url(&config.search_url).map_err(|e| {
        ScrapeError::Navigation(SessionError::Navigation {
            url: config.search_url.clone(),
            reason: e.to_string(),
        })
    })?;
    let filter = LinkFilter::new(&run.query, &config.blocked_host);

    info!("Searching `{}`", run.query.text());
    run.session.navigate(url.as_str()).await.map_err(ScrapeError::Navigation)?;
    reporter
        .send(reporter.update(format!("Starting scrape for TLD: {}", run.query.tld()), 0).with_progress(0.0))
        .await;
    pause(config.settle_delay, &run.cancel).await;

    while run.page < config.max_pages {
        let page_no = run.page + 1;

        if run.cancel.is_cancelled() {
            return cancelled(run, reporter).await;
        }

        if captcha_present(run, config).await? {
            warn!("CAPTCHA detected on page {} for {}", page_no, run.query.tld());
            reporter
                .send(reporter.update("CAPTCHA detected! Please solve it manually.", run.domains.len()))
                .await;
            if !wait_for_captcha(run, config).await? {
                return cancelled(run, reporter).await;
            }
            reporter
                .send(reporter.update("CAPTCHA solved, resuming...", run.domains.len()))
                .await;
            pause(config.settle_delay, &run.cancel).await;
        }

        match run.session.find_one(&config.results_selector, config.results_timeout).await {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {
                info!("No search results on page {} for {}", page_no, run.query.tld());
                reporter.send(reporter.update("No search results found", run.domains.len())).await;
                return Ok(RunOutcome::Exhausted);
            }
            Err(e) => return Err(ScrapeError::Unexpected(e)),
        }

        let added = collect_links(run, &filter, reporter).await?;
        run.page = page_no;
        info!("Page {}: {} new domains, {} total", page_no, added, run.domains.len());
        reporter
            .send(
                reporter
                    .update(format!("Extracted links from page {}", page_no), run.domains.len())
                    .with_page(page_no)
                    .with_progress(page_no as f32 / config.max_pages as f32),
            )
            .await;

        if run.page >= config.max_pages {
            break;
        }

        let Some(next) = find_next(run, config).await? else {
            info!("No next page after page {} for {}", page_no, run.query.tld());
            reporter.send(reporter.update("No more pages available", run.domains.len())).await;
            return Ok(RunOutcome::Exhausted);
        };
        if let Err(e) = next.click().await {
            warn!("Failed to click next page control: {}", e);
            reporter.send(reporter.update("Could not open the next page", run.domains.len())).await;
            return Ok(RunOutcome::Exhausted);
        }
        match run.session.current_url().await {
            Ok(Some(url)) => debug!("Moved to page {}: {}", page_no + 1, url),
            Ok(None) => debug!("Moved to page {}", page_no + 1),
            Err(e) => debug!("Moved to page {}, address unknown: {}", page_no + 1, e),
        }
        reporter
            .send(reporter.update(format!("Moving to page {}", page_no + 1), run.domains.len()).with_page(page_no + 1))
            .await;

        let delay_ms = rand::rng().random_range(config.page_delay_ms.clone());
        pause(Duration::from_millis(delay_ms), &run.cancel).await;
    }

    info!("Page cap of {} reached for {}", config.max_pages, run.query.tld());
    Ok(RunOutcome::PageCap)
}

async fn cancelled<S: BrowserSession>(run: &RunState<S>, reporter: &Reporter<'_>) -> Result<RunOutcome, ScrapeError> {
    info!("Scrape for {} cancelled after {} pages", run.query.tld(), run.page);
    reporter.send(reporter.update("Scraping cancelled by user", run.domains.len())).await;
    Ok(RunOutcome::Cancelled)
}

/// Reads every anchor on the page and records the accepted base domains.
/// Returns how many of them were new.
async fn collect_links<S: BrowserSession>(
    run: &mut RunState<S>,
    filter: &LinkFilter,
    reporter: &Reporter<'_>,
) -> Result<usize, ScrapeError> {
    let anchors = run.session.find_all("a").await.map_err(ScrapeError::Unexpected)?;
    debug!("Found {} links on page {}", anchors.len(), run.page + 1);

    let mut added = 0;
    for anchor in anchors {
        let href = match anchor.attribute("href").await {
            Ok(Some(href)) => href,
            Ok(None) => continue,
            Err(e) => {
                debug!("Skipping unreadable link: {}", e);
                continue;
            }
        };

        match filter.accept(&href) {
            Some(domain) => {
                if run.record(domain.clone()) {
                    debug!("Adding domain: {}", domain);
                    added += 1;
                    reporter
                        .send(reporter.update(format!("Found domain: {}", domain), run.domains.len()))
                        .await;
                }
            }
            None => debug!("Rejected link: {}", href),
        }
    }

    Ok(added)
}

async fn captcha_present<S: BrowserSession>(run: &RunState<S>, config: &ScraperConfig) -> Result<bool, ScrapeError> {
    match run.session.find_one(&config.captcha_selector, config.captcha_probe_timeout).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_timeout() => Ok(false),
        Err(e) => Err(ScrapeError::Unexpected(e)),
    }
}

/// Holds the run until the challenge is gone. Returns false if the run was
/// cancelled meanwhile.
async fn wait_for_captcha<S: BrowserSession>(run: &RunState<S>, config: &ScraperConfig) -> Result<bool, ScrapeError> {
    loop {
        match config.captcha_policy {
            CaptchaPolicy::Poll { interval } => {
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = run.cancel.cancelled() => return Ok(false),
                }
            }
            CaptchaPolicy::Manual => {
                let confirmed = tokio::select! {
                    confirmed = operator_confirmation() => confirmed,
                    _ = run.cancel.cancelled() => return Ok(false),
                };
                if !confirmed {
                    warn!("Cannot read operator input, polling for the CAPTCHA instead");
                    tokio::select! {
                        _ = sleep(FALLBACK_CAPTCHA_POLL) => {}
                        _ = run.cancel.cancelled() => return Ok(false),
                    }
                }
            }
        }

        if run.cancel.is_cancelled() {
            return Ok(false);
        }
        if !captcha_present(run, config).await? {
            info!("CAPTCHA cleared for {}", run.query.tld());
            return Ok(true);
        }
        debug!("CAPTCHA still present for {}", run.query.tld());
    }
}

/// Waits for the operator to press Enter. False when stdin is unusable.
async fn operator_confirmation() -> bool {
    println!("CAPTCHA detected! Please solve it in the browser, then press Enter...");
    read_confirmation(&OPERATOR_INPUT).await
}

/// Takes one line from `input`. Safe to drop midway: no input is lost.
pub(super) async fn read_confirmation<R: AsyncBufRead + Unpin>(input: &Mutex<Lines<R>>) -> bool {
    let mut lines = input.lock().await;
    match lines.next_line().await {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(e) => {
            debug!("Failed to read from stdin: {}", e);
            false
        }
    }
}

/// Locates the next-page control: the configured selector first, then any
/// anchor whose text mentions `next_text`.
async fn find_next<S: BrowserSession>(
    run: &RunState<S>,
    config: &ScraperConfig,
) -> Result<Option<S::Element>, ScrapeError> {
    match run.session.find_one(&config.next_selector, config.next_timeout).await {
        Ok(next) => return Ok(Some(next)),
        Err(e) if e.is_timeout() => {}
        Err(e) => return Err(ScrapeError::Unexpected(e)),
    }

    if config.next_text.is_empty() {
        return Ok(None);
    }
    let anchors = run.session.find_all("a").await.map_err(ScrapeError::Unexpected)?;
    for anchor in anchors {
        if let Ok(Some(text)) = anchor.text().await {
            if text.contains(&config.next_text) {
                return Ok(Some(anchor));
            }
        }
    }
    Ok(None)
}

/// Sleeps for `duration`, waking early on cancellation.
async fn pause(duration: Duration, cancel: &CancelFlag) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}

struct Reporter<'a> {
    sink: Option<&'a dyn ProgressSink>,
    tld: String,
}

impl Reporter<'_> {
    fn update(&self, message: impl Into<String>, found: usize) -> ProgressUpdate {
        ProgressUpdate::new(&self.tld, message, found)
    }

    async fn send(&self, update: ProgressUpdate) {
        if let Some(sink) = self.sink {
            if let Err(e) = sink.report(update).await {
                warn!("Failed to send progress update: {}", e);
            }
        }
    }
}

/// Entry point tying a session factory, configuration and progress sink
/// together.
pub struct Scraper<F: SessionFactory> {
    factory: Arc<F>,
    config: ScraperConfigRef,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl<F: SessionFactory> Clone for Scraper<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            config: Arc::clone(&self.config),
            sink: self.sink.clone(),
        }
    }
}

impl<F: SessionFactory> Scraper<F> {
    pub fn new(factory: Arc<F>, config: ScraperConfigRef) -> Self {
        Self {
            factory,
            config,
            sink: None,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Scrapes `tld` to completion on the current task.
    pub async fn scrape(&self, tld: &str) -> Result<ScrapeReport, ScrapeError> {
        self.scrape_with_cancel(tld, &CancelFlag::new()).await
    }

    pub async fn scrape_with_cancel(&self, tld: &str, cancel: &CancelFlag) -> Result<ScrapeReport, ScrapeError> {
        scrape(self.factory.as_ref(), tld, &self.config, cancel, self.sink.as_deref()).await
    }

    /// Starts a run in the background using the scraper's own sink.
    pub fn start(&self, tld: &str) -> ScrapeHandle {
        self.start_with_progress(tld, self.sink.clone())
    }

    /// Starts a run in the background reporting to `sink`.
    pub fn start_with_progress(&self, tld: &str, sink: Option<Arc<dyn ProgressSink>>) -> ScrapeHandle {
        let cancel = CancelFlag::new();
        let factory = Arc::clone(&self.factory);
        let config = Arc::clone(&self.config);
        let flag = cancel.clone();
        let run_tld = tld.to_string();

        let task = tokio::spawn(async move {
            scrape(factory.as_ref(), &run_tld, &config, &flag, sink.as_deref()).await
        });

        ScrapeHandle {
            tld: tld.to_string(),
            cancel,
            task,
        }
    }
}

/// Caller-held handle of a background run.
pub struct ScrapeHandle {
    tld: String,
    cancel: CancelFlag,
    task: JoinHandle<Result<ScrapeReport, ScrapeError>>,
}

impl ScrapeHandle {
    pub fn tld(&self) -> &str {
        &self.tld
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<ScrapeReport, ScrapeError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ScrapeError::Terminated(e.to_string())),
        }
    }
}
