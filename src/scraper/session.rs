use async_trait::async_trait;
use log2::{info, warn};
use std::time::Duration;
use tokio::time::sleep;

use super::error::{ScrapeError, SessionError};

/// Handle to an element on the page currently loaded in a session.
#[async_trait]
pub trait PageElement: Send + Sync + 'static {
    /// Attribute value; for `href` this is the resolved, absolute target.
    async fn attribute(&self, name: &str) -> Result<Option<String>, SessionError>;

    /// Visible text of the element.
    async fn text(&self) -> Result<Option<String>, SessionError>;

    async fn click(&self) -> Result<(), SessionError>;
}

/// Browser automation capability a scrape run drives.
///
/// A session is owned by exactly one run and released through [`quit`].
///
/// [`quit`]: BrowserSession::quit
#[async_trait]
pub trait BrowserSession: Send + Sync + 'static {
    type Element: PageElement;

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    async fn find_all(&self, selector: &str) -> Result<Vec<Self::Element>, SessionError>;

    /// First element matching `selector`, waiting up to `timeout` for it.
    /// Fails with [`SessionError::Timeout`] when nothing shows up.
    async fn find_one(&self, selector: &str, timeout: Duration) -> Result<Self::Element, SessionError>;

    async fn current_url(&self) -> Result<Option<String>, SessionError>;

    async fn quit(self) -> Result<(), SessionError>;
}

/// Produces fresh, independent sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: BrowserSession;

    async fn open(&self) -> Result<Self::Session, SessionError>;
}

/// Opens a session, retrying up to `attempts` times with a fixed `delay`.
pub async fn acquire_session<F: SessionFactory + ?Sized>(
    factory: &F,
    attempts: usize,
    delay: Duration,
) -> Result<F::Session, ScrapeError> {
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match factory.open().await {
            Ok(session) => {
                info!("Browser session ready (attempt {}/{})", attempt, attempts);
                return Ok(session);
            }
            Err(e) if attempt < attempts => {
                warn!("Failed to start browser session (attempt {}/{}): {}", attempt, attempts, e);
                sleep(delay).await;
            }
            Err(e) => {
                return Err(ScrapeError::SessionInit {
                    attempts,
                    source: e,
                });
            }
        }
    }
}
