//! Integration tests for site scraping
//!
//! These tests serve listing pages from a wiremock server and drive a
//! `SiteScraper` against them.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sumi_harvest::config::{ScrapingConfig, SiteConfig};
use sumi_harvest::crawler::{
    build_http_client, FetchStrategy, PageRenderer, RenderSession, SiteScraper,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A site with no throttling so tests run immediately
fn test_site(base_url: &str) -> SiteConfig {
    let mut site = SiteConfig::new("reports", format!("{}/", base_url));
    site.rate_limit.requests_per_minute = 600;
    site.rate_limit.delay_between_requests = 0.0;
    site
}

fn scraper_for(site: &SiteConfig) -> SiteScraper {
    let scraping = ScrapingConfig::default();
    let client = build_http_client(&scraping).expect("client");
    SiteScraper::new(site, client, &scraping).expect("scraper")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!("<html><body>{}</body></html>", body))
        .insert_header("content-type", "text/html")
}

#[tokio::test]
async fn test_scrape_follows_pagination_up_to_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/files/a.pdf">Annual report</a>
               <a href="/files/b.pdf" title="Budget 2024">b</a>
               <a href="/files/notes.txt">Notes</a>
               <a class="next" href="/page2">Next</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html(
            r#"<a href="/files/c.pdf">Census tables</a>
               <a class="next" href="/page3">Next</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page3"))
        .respond_with(html(r#"<a href="/files/d.pdf">Never reached</a>"#))
        .expect(0)
        .mount(&server)
        .await;

    let mut site = test_site(&server.uri());
    site.pagination.enabled = true;
    site.pagination.max_pages = 2;

    let outcome = scraper_for(&site).scrape().await.unwrap();

    assert_eq!(outcome.strategy, Some(FetchStrategy::Static));
    assert_eq!(outcome.pages_scraped, 2);

    let urls: Vec<_> = outcome.links.iter().map(|l| l.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/files/a.pdf", server.uri()),
            format!("{}/files/b.pdf", server.uri()),
            format!("{}/files/c.pdf", server.uri()),
        ]
    );
    assert_eq!(outcome.links[0].title, "Annual report");
    assert_eq!(outcome.links[1].title, "Budget 2024");
    assert!(outcome.links.iter().all(|l| l.file_type == ".pdf"));
}

#[tokio::test]
async fn test_pagination_disabled_reads_one_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/files/a.pdf">A</a><a class="next" href="/page2">Next</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html(r#"<a href="/files/b.pdf">B</a>"#))
        .expect(0)
        .mount(&server)
        .await;

    let site = test_site(&server.uri());
    let outcome = scraper_for(&site).scrape().await.unwrap();

    assert_eq!(outcome.pages_scraped, 1);
    assert_eq!(outcome.links.len(), 1);
}

#[tokio::test]
async fn test_pagination_stops_on_revisit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/files/a.pdf">A</a><a class="next" href="/page2">Next</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html(
            r#"<a href="/files/b.pdf">B</a><a class="next" href="/">Back to start</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut site = test_site(&server.uri());
    site.pagination.enabled = true;
    site.pagination.max_pages = 10;

    let outcome = scraper_for(&site).scrape().await.unwrap();
    assert_eq!(outcome.pages_scraped, 2);
    assert_eq!(outcome.links.len(), 2);
}

#[tokio::test]
async fn test_robots_disallow_yields_no_links() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/files/a.pdf">A</a>"#))
        .expect(0)
        .mount(&server)
        .await;

    let site = test_site(&server.uri());
    let outcome = scraper_for(&site).scrape().await.unwrap();

    assert!(outcome.links.is_empty());
    assert_eq!(outcome.pages_scraped, 0);
    assert_eq!(outcome.strategy, None);
}

#[tokio::test]
async fn test_entry_page_error_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let site = test_site(&server.uri());
    let result = scraper_for(&site).scrape().await;

    assert!(result.is_err());
}

/// Serves fixed rendered pages; each successful click advances one page
struct FakeRenderer {
    pages: Vec<String>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

struct FakeSession {
    url: Url,
    pages: Vec<String>,
    current: usize,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn open(&self, url: &Url) -> sumi_harvest::Result<Box<dyn RenderSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            url: url.clone(),
            pages: self.pages.clone(),
            current: 0,
            closed: self.closed.clone(),
        }))
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    fn current_url(&self) -> Url {
        self.url.clone()
    }

    async fn content(&mut self) -> sumi_harvest::Result<String> {
        Ok(self.pages[self.current].clone())
    }

    async fn click_next(&mut self, _selector: &str) -> sumi_harvest::Result<bool> {
        if self.current + 1 < self.pages.len() {
            self.current += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn close(&mut self) -> sumi_harvest::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_script_heavy_page_uses_renderer() {
    let server = MockServer::start().await;

    let scripts = "<script></script>".repeat(12);
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&scripts))
        .mount(&server)
        .await;

    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let renderer = FakeRenderer {
        pages: vec![
            r#"<html><body><a href="/r/one.pdf">One</a><a class="next">Next</a></body></html>"#
                .to_string(),
            r#"<html><body><a href="/r/two.pdf">Two</a></body></html>"#.to_string(),
        ],
        opened: opened.clone(),
        closed: closed.clone(),
    };

    let mut site = test_site(&server.uri());
    site.pagination.enabled = true;

    let mut scraper = scraper_for(&site).with_renderer(Some(Arc::new(renderer)));
    let outcome = scraper.scrape().await.unwrap();

    assert_eq!(outcome.strategy, Some(FetchStrategy::Rendered));
    assert_eq!(outcome.pages_scraped, 2);
    let urls: Vec<_> = outcome.links.iter().map(|l| l.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/r/one.pdf", server.uri()),
            format!("{}/r/two.pdf", server.uri()),
        ]
    );
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rendered_decision_without_renderer_falls_back_to_markup() {
    let server = MockServer::start().await;

    let body = format!(
        "{}<a href=\"/files/a.pdf\">A</a>",
        "<script></script>".repeat(12)
    );
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&body))
        .mount(&server)
        .await;

    let site = test_site(&server.uri());
    let outcome = scraper_for(&site).scrape().await.unwrap();

    assert_eq!(outcome.strategy, Some(FetchStrategy::Static));
    assert_eq!(outcome.links.len(), 1);
}
