use thiserror::Error;

/// Failures reported by a browser session backend.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to start browser session: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Element did not show up before the deadline
    #[error("Timed out waiting for `{selector}`")]
    Timeout { selector: String },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Element is not interactable: {0}")]
    NotInteractable(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }
}

/// Errors surfaced to the caller of a scrape run.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Invalid TLD `{0}`")]
    InvalidTld(String),

    #[error("Could not obtain a browser session after {attempts} attempts: {source}")]
    SessionInit {
        attempts: usize,
        #[source]
        source: SessionError,
    },

    #[error("Could not open search results: {0}")]
    Navigation(#[source] SessionError),

    #[error("Scrape aborted: {0}")]
    Unexpected(#[source] SessionError),

    /// Run task panicked or was aborted before reporting back
    #[error("Scrape terminated unexpectedly: {0}")]
    Terminated(String),
}

/// Progress delivery failure. Logged by the runner, never propagated.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Progress receiver is gone")]
    Closed,

    #[error("Progress delivery failed: {0}")]
    Other(String),
}
