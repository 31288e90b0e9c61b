use std::sync::Arc;
use std::time::Duration;
use tld_scraper::browser::HttpSessionFactory;
use tld_scraper::scraper::{CancelFlag, CaptchaPolicy, RunOutcome, ScrapeError, Scraper, ScraperConfig};
use tld_scraper::storage::{self, DomainStore};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn results_page(links: &[&str], next: Option<&str>) -> String {
    let mut body = String::from("<html><body><div id=\"search\">");
    for link in links {
        body.push_str(&format!("<div class=\"g\"><a href=\"{}\">{}</a></div>", link, link));
    }
    body.push_str("</div>");
    if let Some(next) = next {
        body.push_str(&format!("<a id=\"pnnext\" href=\"{}\">Next</a>", next));
    }
    body.push_str("</body></html>");
    body
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

fn test_config(server: &MockServer) -> ScraperConfig {
    ScraperConfig::new()
        .with_search_url(format!("{}/search", server.uri()))
        .with_session_retries(1, Duration::from_millis(1))
        .with_page_delay(0, 0)
        .with_settle_delay(Duration::ZERO)
        .with_element_timeout(Duration::from_millis(50))
        .with_captcha_policy(CaptchaPolicy::Poll {
            interval: Duration::from_millis(20),
        })
}

#[tokio::test]
async fn test_scrape_search_results_over_http() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("start", "10"))
        .respond_with(html(results_page(
            &["https://b.ir/about", "http://portal.gov.ir/", "https://a.ir/other"],
            None,
        )))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "site:.ir -site:.gov.ir"))
        .respond_with(html(results_page(
            &[
                "http://a.ir/page",
                "https://translate.google.com/translate?u=http://c.ir",
                "http://example.com/",
            ],
            Some("/search?start=10"),
        )))
        .mount(&server)
        .await;

    let scraper = Scraper::new(Arc::new(HttpSessionFactory::new()), Arc::new(test_config(&server)));
    let report = scraper.scrape(".IR").await?;

    assert_eq!(report.tld, ".ir");
    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(report.pages_processed, 2);
    assert_eq!(report.sorted_domains(), vec!["http://a.ir", "https://a.ir", "https://b.ir"]);

    let dir = tempfile::tempdir()?;
    let file = storage::write_domain_file(dir.path(), "iran", &report.tld, &report.domains)?;
    assert_eq!(std::fs::read_to_string(file)?, "http://a.ir\nhttps://a.ir\nhttps://b.ir\n");

    let store = DomainStore::connect("sqlite::memory:").await?;
    assert_eq!(store.insert_domains(&report.tld, &report.domains).await?, 3);
    assert_eq!(store.insert_domains(&report.tld, &report.domains).await?, 0);
    assert_eq!(store.list_domains_by_tld(".ir").await?.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_page_cap_stops_paging() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;

    // every page links to itself, so only the cap ends the run
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(html(results_page(&["http://a.ir/"], Some("/search?q=again"))))
        .mount(&server)
        .await;

    let config = test_config(&server).with_max_pages(3);
    let scraper = Scraper::new(Arc::new(HttpSessionFactory::new()), Arc::new(config));
    let report = scraper.scrape(".ir").await?;

    assert_eq!(report.outcome, RunOutcome::PageCap);
    assert_eq!(report.pages_processed, 3);
    assert_eq!(report.domains.len(), 1);

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_captcha_page_waits_until_cancelled() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(html(
            "<html><body><div id=\"captcha\">Are you a robot?</div></body></html>".to_string(),
        ))
        .mount(&server)
        .await;

    let scraper = Scraper::new(Arc::new(HttpSessionFactory::new()), Arc::new(test_config(&server)));
    let handle = scraper.start(".ir");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());

    handle.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle.join()).await??;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(report.domains.is_empty());
    assert_eq!(report.pages_processed, 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_search_request_is_navigation_error() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let scraper = Scraper::new(Arc::new(HttpSessionFactory::new()), Arc::new(test_config(&server)));
    let result = scraper.scrape_with_cancel(".ir", &CancelFlag::new()).await;

    assert!(matches!(result, Err(ScrapeError::Navigation(_))));
    Ok(())
}
