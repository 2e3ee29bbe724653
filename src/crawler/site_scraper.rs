//! Site scraping: robots check, strategy selection, extraction and pagination
//!
//! One [`SiteScraper`] handles one site. It owns that site's rate limiter and
//! walks the listing pages sequentially, since cookies, rendered DOM and the
//! pagination cursor are all per-session state.

use crate::config::{ScrapingConfig, SiteConfig};
use crate::crawler::extractor::{extract_links, find_next_page, SiteSelectors};
use crate::crawler::fetcher::fetch_page;
use crate::crawler::link::Link;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::renderer::{PageRenderer, RenderSession};
use crate::crawler::strategy::{select_strategy_for_probe, FetchStrategy};
use crate::robots::fetch_robots;
use crate::{HarvestError, Result};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Links gathered from one site
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub links: Vec<Link>,
    pub pages_scraped: u32,
    /// `None` when robots.txt disallowed the entry page
    pub strategy: Option<FetchStrategy>,
}

/// Scrapes a single site
pub struct SiteScraper {
    site: SiteConfig,
    client: Client,
    user_agent: String,
    respect_robots: bool,
    renderer: Option<Arc<dyn PageRenderer>>,
    limiter: RateLimiter,
    selectors: SiteSelectors,
}

impl SiteScraper {
    /// Creates a scraper for `site`
    ///
    /// # Returns
    ///
    /// * `Ok(SiteScraper)` - Ready to scrape
    /// * `Err(HarvestError)` - A site selector failed to compile
    pub fn new(site: &SiteConfig, client: Client, scraping: &ScrapingConfig) -> Result<Self> {
        Ok(Self {
            selectors: SiteSelectors::compile(site)?,
            site: site.clone(),
            client,
            user_agent: scraping.user_agent.clone(),
            respect_robots: scraping.respect_robots_txt,
            renderer: None,
            limiter: RateLimiter::new(),
        })
    }

    /// Attaches a rendering backend for script-driven pages
    pub fn with_renderer(mut self, renderer: Option<Arc<dyn PageRenderer>>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Collects every allowed link on the site, following pagination
    ///
    /// Failures on the entry page are returned as errors. Failures while
    /// paginating end pagination and keep what was already collected.
    #[instrument(skip(self), fields(site = %self.site.name))]
    pub async fn scrape(&mut self) -> Result<ScrapeOutcome> {
        let base = Url::parse(&self.site.url)?;

        if self.respect_robots {
            let robots = fetch_robots(&self.client, &base).await;
            if !robots.is_allowed(base.as_str(), &self.user_agent) {
                warn!("robots.txt disallows {}, skipping site", base);
                return Ok(ScrapeOutcome {
                    links: Vec::new(),
                    pages_scraped: 0,
                    strategy: None,
                });
            }
            if let Some(delay) = robots.crawl_delay(&self.user_agent) {
                debug!("Honoring crawl-delay of {}s", delay);
                self.limiter
                    .set_min_delay_floor(Duration::from_secs_f64(delay.max(0.0)));
            }
        }

        let mut pages = self.pages(base).await?;
        let strategy = pages.strategy;

        let mut links = Vec::new();
        while let Some(batch) = pages.next_batch().await {
            links.extend(batch);
        }
        let pages_scraped = pages.pages_visited;
        pages.close().await;

        info!(
            "Found {} links across {} page(s) using {} extraction",
            links.len(),
            pages_scraped,
            strategy.as_str()
        );

        Ok(ScrapeOutcome {
            links,
            pages_scraped,
            strategy: Some(strategy),
        })
    }

    /// Loads the entry page and returns a cursor over its link batches
    pub async fn pages(&mut self, entry: Url) -> Result<LinkPages<'_>> {
        self.limiter
            .acquire(&self.site.name, &self.site.rate_limit)
            .await;

        let probe = fetch_page(&self.client, &entry).await;
        let decision = select_strategy_for_probe(
            probe
                .as_ref()
                .ok()
                .map(|page| (page.status, page.body.as_str())),
        );
        debug!("Strategy for {}: {:?}", entry, decision);

        let (cursor, page_url, strategy) = match (decision.strategy, self.renderer.clone()) {
            (FetchStrategy::Rendered, Some(renderer)) => {
                self.limiter
                    .acquire(&self.site.name, &self.site.rate_limit)
                    .await;
                let mut session = renderer.open(&entry).await?;
                let markup = session.content().await?;
                let page_url = session.current_url();
                (
                    Cursor::Rendered { session, markup },
                    page_url,
                    FetchStrategy::Rendered,
                )
            }
            (strategy, _) => {
                if strategy == FetchStrategy::Rendered {
                    warn!("No renderer configured, falling back to static markup for {}", entry);
                }
                let page = probe?;
                if !page.is_success() {
                    return Err(HarvestError::HttpStatus {
                        url: entry.to_string(),
                        status: page.status,
                    });
                }
                let page_url = page.final_url.clone();
                (
                    Cursor::Static {
                        page_url: page.final_url,
                        markup: page.body,
                    },
                    page_url,
                    FetchStrategy::Static,
                )
            }
        };

        let first = extract_links(cursor.markup(), &page_url, &self.selectors, &self.site);

        let mut visited = HashSet::new();
        visited.insert(page_url.to_string());

        Ok(LinkPages {
            strategy,
            scraper: self,
            cursor,
            first: Some(first),
            pages_visited: 1,
            visited,
        })
    }
}

/// Where pagination currently stands
enum Cursor {
    Static { page_url: Url, markup: String },
    Rendered {
        session: Box<dyn RenderSession>,
        markup: String,
    },
    Exhausted,
}

impl Cursor {
    fn markup(&self) -> &str {
        match self {
            Cursor::Static { markup, .. } | Cursor::Rendered { markup, .. } => markup,
            Cursor::Exhausted => "",
        }
    }
}

/// Lazy, bounded, non-restartable sequence of link batches for one site
pub struct LinkPages<'s> {
    scraper: &'s mut SiteScraper,
    cursor: Cursor,
    first: Option<Vec<Link>>,
    /// Strategy actually used for the entry page
    pub strategy: FetchStrategy,
    /// Pages loaded so far, including the entry page
    pub pages_visited: u32,
    visited: HashSet<String>,
}

impl LinkPages<'_> {
    /// Returns the next batch of links, or `None` once pagination ends
    pub async fn next_batch(&mut self) -> Option<Vec<Link>> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }

        let pagination = &self.scraper.site.pagination;
        if !pagination.enabled || self.pages_visited >= pagination.max_pages {
            self.close().await;
            return None;
        }

        let batch = match std::mem::replace(&mut self.cursor, Cursor::Exhausted) {
            Cursor::Exhausted => None,
            Cursor::Static { page_url, markup } => self.advance_static(&page_url, &markup).await,
            Cursor::Rendered { session, markup } => self.advance_rendered(session, &markup).await,
        };

        if batch.is_some() {
            self.pages_visited += 1;
        }
        batch
    }

    async fn advance_static(&mut self, page_url: &Url, markup: &str) -> Option<Vec<Link>> {
        let scraper = &mut *self.scraper;
        let next = find_next_page(markup, page_url, &scraper.selectors)?;
        if !self.visited.insert(next.to_string()) {
            debug!("Pagination revisits {}, stopping", next);
            return None;
        }

        scraper
            .limiter
            .acquire(&scraper.site.name, &scraper.site.rate_limit)
            .await;

        let page = match fetch_page(&scraper.client, &next).await {
            Ok(page) if page.is_success() => page,
            Ok(page) => {
                warn!("Pagination stopped at {}: HTTP {}", next, page.status);
                return None;
            }
            Err(e) => {
                warn!("Pagination stopped at {}: {}", next, e);
                return None;
            }
        };

        let links = extract_links(&page.body, &page.final_url, &scraper.selectors, &scraper.site);
        debug!("Page {} yielded {} links", page.final_url, links.len());
        self.cursor = Cursor::Static {
            page_url: page.final_url,
            markup: page.body,
        };
        Some(links)
    }

    async fn advance_rendered(
        &mut self,
        mut session: Box<dyn RenderSession>,
        markup: &str,
    ) -> Option<Vec<Link>> {
        let scraper = &mut *self.scraper;
        let page_url = session.current_url();
        if !has_control(markup, &scraper.site.pagination.next_selector) {
            close_session(session).await;
            return None;
        }

        scraper
            .limiter
            .acquire(&scraper.site.name, &scraper.site.rate_limit)
            .await;

        let next_selector = scraper.site.pagination.next_selector.clone();
        match session.click_next(&next_selector).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Next control on {} is not clickable", page_url);
                close_session(session).await;
                return None;
            }
            Err(e) => {
                warn!("Pagination click failed on {}: {}", page_url, e);
                close_session(session).await;
                return None;
            }
        }

        let markup = match session.content().await {
            Ok(markup) => markup,
            Err(e) => {
                warn!("Could not read rendered page after {}: {}", page_url, e);
                close_session(session).await;
                return None;
            }
        };

        let current = session.current_url();
        let links = extract_links(&markup, &current, &scraper.selectors, &scraper.site);
        self.cursor = Cursor::Rendered { session, markup };
        Some(links)
    }

    /// Ends pagination and releases any rendering session
    pub async fn close(&mut self) {
        if let Cursor::Rendered { session, .. } =
            std::mem::replace(&mut self.cursor, Cursor::Exhausted)
        {
            close_session(session).await;
        }
    }
}

async fn close_session(mut session: Box<dyn RenderSession>) {
    if let Err(e) = session.close().await {
        debug!("Error closing render session: {}", e);
    }
}

/// Whether any element matches the next-control selector
fn has_control(markup: &str, selector: &str) -> bool {
    let Ok(selector) = scraper::Selector::parse(selector) else {
        return false;
    };
    let document = scraper::Html::parse_document(markup);
    let found = document.select(&selector).next().is_some();
    found
}
