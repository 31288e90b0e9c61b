use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::scraper::{CaptchaPolicy, ScraperConfig};

/// TLDs scraped when none are given on the command line
pub const DEFAULT_TLDS: &[&str] = &[
    ".ir",
    ".persianblog.ir",
    ".rzb.ir",
    ".co.ir",
    ".ac.ir",
    ".sch.ir",
    ".org.ir",
    ".id.ir",
    ".r98.ir",
    ".epage.ir",
];

/// Log levels as defined in log2 crate
#[derive(Debug, Serialize, Deserialize, Clone, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Which browser backend drives the search pages
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Driver {
    /// Real Chrome over the DevTools protocol
    Chrome,
    /// Plain HTTP requests, no JavaScript
    Http,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CaptchaMode {
    /// Re-check periodically until the challenge disappears
    Poll,
    /// Wait for Enter after solving it in the browser window
    Manual,
}

/// This struct is supposed to receive all program arguments while ScraperConfig
/// describes only a single scrape run
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
    /// Browser backend
    #[arg(long, global = true, default_value = "chrome", value_enum)]
    pub driver: Driver,
    /// Run Chrome without a visible window
    #[arg(long, global = true)]
    pub headless: bool,
    /// Path to the Chrome/Chromium binary
    #[arg(long, global = true)]
    pub chrome_path: Option<PathBuf>,
    /// DevTools websocket URL of a running Chrome to attach to
    #[arg(long, global = true, env = "CHROMIUM_REMOTE_DEBUGGING_URL")]
    pub remote_browser: Option<String>,
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", value_enum)]
    pub log_level: LogLevel,
    /// Also write the log to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Serialize, Deserialize)]
pub enum Command {
    /// Scrape domains for one or more TLDs and save them
    Scrape(ScrapeArgs),
    /// Serve the HTTP/websocket API
    Serve(ServeArgs),
    /// Print stored domains
    Domains(DomainsArgs),
}

#[derive(Args, Debug, Serialize, Deserialize)]
pub struct RunArgs {
    /// Maximum number of result pages per TLD
    #[arg(long, default_value = "30")]
    pub max_pages: usize,
    /// Attempts to start a browser session
    #[arg(long, default_value = "3")]
    pub session_retries: usize,
    /// Minimum pause after moving to the next page in milliseconds
    #[arg(long, default_value = "3000")]
    pub min_delay_ms: u64,
    /// Maximum pause after moving to the next page in milliseconds
    #[arg(long, default_value = "5000")]
    pub max_delay_ms: u64,
    /// How to wait out a CAPTCHA
    #[arg(long, default_value = "poll", value_enum)]
    pub captcha: CaptchaMode,
    /// Seconds between CAPTCHA checks in poll mode
    #[arg(long, default_value = "5")]
    pub captcha_poll_secs: u64,
    /// Domains under this suffix are excluded
    #[arg(long, default_value = ".gov.ir")]
    pub excluded_suffix: String,
    /// Search results endpoint
    #[arg(long, default_value = "https://www.google.com/search")]
    pub search_url: String,
}

#[derive(Args, Debug, Serialize, Deserialize)]
pub struct ScrapeArgs {
    /// TLDs to scrape (repeatable); defaults to the Iranian second-level zones
    #[arg(short, long = "tld")]
    pub tlds: Vec<String>,
    #[command(flatten)]
    pub run: RunArgs,
    /// Directory for the per-TLD domain files
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
    /// File name prefix, files are named `<prefix>_<tld>.txt`
    #[arg(long, default_value = "domains")]
    pub file_prefix: String,
    /// Also store results in this SQLite database (e.g. sqlite://domains.db)
    #[arg(long)]
    pub database: Option<String>,
}

#[derive(Args, Debug, Serialize, Deserialize)]
pub struct ServeArgs {
    #[command(flatten)]
    pub run: RunArgs,
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,
    #[arg(long, default_value = "sqlite://domains.db")]
    pub database: String,
}

#[derive(Args, Debug, Serialize, Deserialize)]
pub struct DomainsArgs {
    /// Only list domains of this TLD
    #[arg(long)]
    pub tld: Option<String>,
    #[arg(long, default_value = "sqlite://domains.db")]
    pub database: String,
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let run = match &self.command {
            Command::Scrape(args) => &args.run,
            Command::Serve(args) => &args.run,
            Command::Domains(_) => return Ok(()),
        };
        run.validate()
    }
}

impl RunArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_pages == 0 {
            anyhow::bail!("max_pages must be greater than 0");
        }
        if self.session_retries == 0 {
            anyhow::bail!("session_retries must be greater than 0");
        }
        if self.min_delay_ms > self.max_delay_ms {
            anyhow::bail!("min_delay_ms must not exceed max_delay_ms");
        }
        if self.captcha == CaptchaMode::Poll && self.captcha_poll_secs == 0 {
            anyhow::bail!("captcha_poll_secs must be greater than 0");
        }
        url::Url::parse(&self.search_url)?;
        Ok(())
    }

    pub fn scraper_config(&self) -> ScraperConfig {
        let policy = match self.captcha {
            CaptchaMode::Poll => CaptchaPolicy::Poll {
                interval: Duration::from_secs(self.captcha_poll_secs),
            },
            CaptchaMode::Manual => CaptchaPolicy::Manual,
        };
        ScraperConfig::new()
            .with_search_url(self.search_url.clone())
            .with_excluded_suffix(self.excluded_suffix.clone())
            .with_max_pages(self.max_pages)
            .with_session_retries(self.session_retries, Duration::from_secs(2))
            .with_page_delay(self.min_delay_ms, self.max_delay_ms)
            .with_captcha_policy(policy)
    }
}

impl ScrapeArgs {
    pub fn tlds(&self) -> Vec<String> {
        if self.tlds.is_empty() {
            DEFAULT_TLDS.iter().map(|t| t.to_string()).collect()
        } else {
            self.tlds.clone()
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}
