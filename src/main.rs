use anyhow::Result;
use log2::*;
use std::sync::Arc;
use std::time::Instant;

use tld_scraper::browser::{ChromeSessionFactory, HttpSessionFactory};
use tld_scraper::config::{Command, Config, DomainsArgs, Driver, ScrapeArgs, ServeArgs};
use tld_scraper::scraper::{LogSink, RunOutcome, Scraper, SessionFactory};
use tld_scraper::server::{self, AppState};
use tld_scraper::storage::{self, DomainStore};

/// Indicates start time of a project, lazily initialized
pub static START_TIME: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = *START_TIME;
    let cfg = Config::new();
    cfg.validate()?;
    let _log2 = match &cfg.log_file {
        Some(path) => open(&path.to_string_lossy())
            .tee(true)
            .module(true)
            .module_with_line(true)
            .module_filter(|module| module.starts_with("tld_scraper"))
            .level(cfg.log_level.to_string())
            .start(),
        None => stdout()
            .module(true) // include module name
            .module_with_line(true) // include line number from module
            .module_filter(|module| module.starts_with("tld_scraper"))
            .compress(false)
            .level(cfg.log_level.to_string())
            .start(),
    };

    let result = match &cfg.command {
        Command::Scrape(args) => match cfg.driver {
            Driver::Chrome => run_scrape(chrome_factory(&cfg), args).await,
            Driver::Http => run_scrape(HttpSessionFactory::new(), args).await,
        },
        Command::Serve(args) => match cfg.driver {
            Driver::Chrome => run_server(chrome_factory(&cfg), args).await,
            Driver::Http => run_server(HttpSessionFactory::new(), args).await,
        },
        Command::Domains(args) => list_domains(args).await,
    };

    debug!("Finished after {:?}", START_TIME.elapsed());
    result
}

fn chrome_factory(cfg: &Config) -> ChromeSessionFactory {
    ChromeSessionFactory::new()
        .with_headless(cfg.headless)
        .with_chrome_executable(cfg.chrome_path.clone())
        .with_remote_url(cfg.remote_browser.clone())
}

/// Scrapes each TLD in turn. Ctrl-C cancels the current TLD, keeps what it
/// found and skips the rest.
async fn run_scrape<F: SessionFactory>(factory: F, args: &ScrapeArgs) -> Result<()> {
    let scraper = Scraper::new(Arc::new(factory), Arc::new(args.run.scraper_config()))
        .with_progress(Arc::new(LogSink));
    let store = match &args.database {
        Some(url) => Some(DomainStore::connect(url).await?),
        None => None,
    };

    let tlds = args.tlds();
    info!("Scraping {} TLDs, up to {} pages each", tlds.len(), scraper.config().max_pages);
    let mut failed = Vec::new();
    for tld in &tlds {
        info!("Scraping domains for TLD: {}", tld);
        let handle = scraper.start(tld);
        let cancel = handle.cancel_flag();
        let join = handle.join();
        tokio::pin!(join);

        let mut interrupted = false;
        let result = loop {
            tokio::select! {
                result = &mut join => break result,
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    warn!("Interrupted, stopping {} with what has been found so far", tld);
                    interrupted = true;
                    cancel.cancel();
                }
            }
        };

        match result {
            Ok(report) => {
                println!("\nUnique Domain List for {}:", report.tld);
                for domain in report.sorted_domains() {
                    println!("{}", domain);
                }
                let path = storage::write_domain_file(&args.output_dir, &args.file_prefix, &report.tld, &report.domains)?;
                println!("\nDomains for {} have been saved to {}", report.tld, path.display());

                if let Some(store) = &store {
                    let inserted = store.insert_domains(&report.tld, &report.domains).await?;
                    info!("{} new domains for {} stored in the database", inserted, report.tld);
                }
                if report.outcome == RunOutcome::Cancelled {
                    break;
                }
            }
            Err(e) => {
                error!("Scraping {} failed: {}", tld, e);
                failed.push(tld.clone());
            }
        }

        if interrupted {
            break;
        }
    }

    if let Some(store) = &store {
        store.close().await;
    }
    if !failed.is_empty() {
        anyhow::bail!("Scraping failed for {} of {} TLDs: {}", failed.len(), tlds.len(), failed.join(", "));
    }
    Ok(())
}

async fn run_server<F: SessionFactory>(factory: F, args: &ServeArgs) -> Result<()> {
    let store = DomainStore::connect(&args.database).await?;
    let scraper = Scraper::new(Arc::new(factory), Arc::new(args.run.scraper_config()))
        .with_progress(Arc::new(LogSink));
    let state = Arc::new(AppState { scraper, store });
    server::serve(args.bind, state).await
}

async fn list_domains(args: &DomainsArgs) -> Result<()> {
    let store = DomainStore::connect(&args.database).await?;
    let rows = match &args.tld {
        Some(tld) => store.list_domains_by_tld(tld).await?,
        None => store.list_domains().await?,
    };

    for row in &rows {
        println!("{}\t{}\t{}\t{}", row.id, row.domain_name, row.tld, row.created_at.to_rfc3339());
    }
    info!("{} domains listed", rows.len());
    store.close().await;
    Ok(())
}
