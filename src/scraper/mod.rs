pub mod config;
pub mod error;
pub mod filter;
pub mod progress;
pub mod runner;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{CaptchaPolicy, ScraperConfig, ScraperConfigRef, DEFAULT_MAX_PAGES};
pub use error::{ScrapeError, SessionError, SinkError};
pub use filter::{LinkFilter, SearchQuery, base_domain, normalize_tld};
pub use progress::{ChannelSink, LogSink, ProgressSink, ProgressUpdate};
pub use runner::{ScrapeHandle, Scraper, scrape};
pub use session::{BrowserSession, PageElement, SessionFactory, acquire_session};
pub use state::{CancelFlag, RunOutcome, RunState, ScrapeReport};
