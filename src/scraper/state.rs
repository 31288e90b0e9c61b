use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use super::filter::SearchQuery;
use super::session::BrowserSession;

/// Cooperative cancellation shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Calling it again is a no-op.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](CancelFlag::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// How a run that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No results container or no next control: nothing more to read
    Exhausted,
    /// The configured page budget was used up
    PageCap,
    Cancelled,
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub tld: String,
    pub domains: HashSet<String>,
    pub pages_processed: usize,
    pub outcome: RunOutcome,
}

impl ScrapeReport {
    pub fn sorted_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.iter().cloned().collect();
        domains.sort();
        domains
    }
}

/// Everything one run mutates. Owns the browser session until the run ends.
pub struct RunState<S: BrowserSession> {
    pub session: S,
    pub query: SearchQuery,
    /// Pages fully processed so far
    pub page: usize,
    pub domains: HashSet<String>,
    pub cancel: CancelFlag,
}

impl<S: BrowserSession> RunState<S> {
    pub fn new(session: S, query: SearchQuery, cancel: CancelFlag) -> Self {
        Self {
            session,
            query,
            page: 0,
            domains: HashSet::new(),
            cancel,
        }
    }

    /// Adds a base domain; returns false when it was already known.
    pub fn record(&mut self, domain: String) -> bool {
        self.domains.insert(domain)
    }

    pub fn into_parts(self) -> (S, HashSet<String>, usize) {
        (self.session, self.domains, self.page)
    }
}
